//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use framepipe::adapters::StaticFetcher;
use framepipe::core::ActivityOptions;
use framepipe::domain::{Artifact, Event, EventType, PipelineResult};
use framepipe::frames::codec;
use framepipe::operations::{load_frame, transform_error, Operation, OperationRegistry};
use framepipe::runtime::{Broker, PipelineClient, WorkerOptions, WorkerPool};
use framepipe::workspace::{JobHistory, Workspace};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;

pub const NAMESPACE: &str = "test";
pub const QUEUE: &str = "frames";

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const GREEN: [u8; 4] = [0, 255, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

/// Distinct opaque colours, one per frame
pub fn palette(n: usize) -> Vec<[u8; 4]> {
    (0..n)
        .map(|i| {
            let i = i as u32;
            [
                (i * 20 % 256) as u8,
                (255 - i * 20 % 256) as u8,
                (i * 53 % 256) as u8,
                255,
            ]
        })
        .collect()
}

pub fn solid(color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(4, 4, Rgba(color))
}

pub fn png_of(color: [u8; 4]) -> Vec<u8> {
    codec::encode_png(&DynamicImage::ImageRgba8(solid(color))).unwrap()
}

pub fn gif_of(colors: &[[u8; 4]]) -> Vec<u8> {
    let frames = colors
        .iter()
        .map(|c| DynamicImage::ImageRgba8(solid(*c)))
        .collect();
    let (bytes, _) = codec::encode_output(frames, Duration::from_millis(100)).unwrap();
    bytes
}

/// APNG with one solid frame per colour
pub fn apng_of(colors: &[[u8; 4]]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, 4, 4);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_animated(colors.len() as u32, 0).unwrap();

        let mut writer = encoder.write_header().unwrap();
        for color in colors {
            writer.write_image_data(solid(*color).as_raw()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}

fn riff_chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut chunk = fourcc.to_vec();
    chunk.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    chunk.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        chunk.push(0);
    }
    chunk
}

fn u24(value: u32) -> [u8; 3] {
    let bytes = value.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// The VP8L chunk (header included) of a lossless WebP still
fn lossless_chunk(color: [u8; 4]) -> Vec<u8> {
    let mut still = Vec::new();
    DynamicImage::ImageRgba8(solid(color))
        .write_to(&mut Cursor::new(&mut still), ImageFormat::WebP)
        .unwrap();

    let mut offset = 12;
    loop {
        let size = u32::from_le_bytes(still[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let end = offset + 8 + size + size % 2;
        if &still[offset..offset + 4] == b"VP8L" {
            return still[offset..end].to_vec();
        }
        offset = end;
    }
}

/// Animated WebP assembled from lossless stills, one frame per colour
pub fn animated_webp_of(colors: &[[u8; 4]]) -> Vec<u8> {
    let (width, height) = (4u32, 4u32);

    // Alpha and animation flags
    let mut vp8x = vec![0x10 | 0x02, 0, 0, 0];
    vp8x.extend_from_slice(&u24(width - 1));
    vp8x.extend_from_slice(&u24(height - 1));

    let mut body = b"WEBP".to_vec();
    body.extend(riff_chunk(b"VP8X", &vp8x));
    body.extend(riff_chunk(b"ANIM", &[0, 0, 0, 0, 0, 0]));

    for color in colors {
        let mut anmf = Vec::new();
        anmf.extend_from_slice(&u24(0));
        anmf.extend_from_slice(&u24(0));
        anmf.extend_from_slice(&u24(width - 1));
        anmf.extend_from_slice(&u24(height - 1));
        anmf.extend_from_slice(&u24(100));
        // Overwrite instead of alpha-blending onto the previous frame
        anmf.push(0x02);
        anmf.extend(lossless_chunk(*color));
        body.extend(riff_chunk(b"ANMF", &anmf));
    }

    riff_chunk(b"RIFF", &body)
}

/// Colour of the top-left pixel of every frame in `bytes`
pub fn frame_colors(bytes: &[u8]) -> Vec<[u8; 4]> {
    codec::decode_frames(bytes)
        .unwrap()
        .iter()
        .map(|frame| frame.get_pixel(0, 0).0)
        .collect()
}

pub fn worker_options() -> WorkerOptions {
    WorkerOptions {
        namespace: NAMESPACE.to_string(),
        queue: QUEUE.to_string(),
        workspace_root: PathBuf::new(),
        concurrency: 4,
        max_redeliveries: 3,
        activity: ActivityOptions::default(),
        max_source_bytes: 10 * 1024 * 1024,
        frame_delay: Duration::from_millis(100),
    }
}

/// Built-in operations plus `extra`
pub fn registry_with(extra: Arc<dyn Operation>) -> OperationRegistry {
    let mut registry = OperationRegistry::with_builtins();
    registry.register_arc(extra);
    registry
}

/// A broker, a client, an in-memory source server and any number of pools
pub struct Harness {
    pub temp: TempDir,
    pub broker: Broker,
    pub client: PipelineClient,
    pub fetcher: Arc<StaticFetcher>,
    pools: Vec<WorkerPool>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let broker = Broker::new();
        let client = PipelineClient::new(&broker, NAMESPACE, QUEUE, temp.path());

        Self {
            temp,
            broker,
            client,
            fetcher: Arc::new(StaticFetcher::new()),
            pools: Vec::new(),
        }
    }

    /// Harness with one pool running `registry` under default test options
    pub fn with_pool(registry: OperationRegistry) -> Self {
        let mut harness = Self::new();
        harness.start_pool(registry, worker_options());
        harness
    }

    /// Start a pool that keeps its workspaces under the harness root
    pub fn start_pool(&mut self, registry: OperationRegistry, mut options: WorkerOptions) {
        options.workspace_root = self.temp.path().to_path_buf();
        self.pools.push(WorkerPool::start_with_fetcher(
            &self.broker,
            options,
            registry,
            self.fetcher.clone(),
        ));
    }

    /// Serve `bytes` at a fresh URL and return it
    pub fn serve(&self, name: &str, bytes: Vec<u8>) -> String {
        let url = format!("http://images.test/{}", name);
        self.fetcher.insert(url.clone(), bytes);
        url
    }

    /// Stop every running pool, leaving job workspaces in place
    pub async fn stop_pools(&mut self) {
        for pool in self.pools.drain(..) {
            pool.shutdown().await;
        }
    }

    pub async fn shutdown(mut self) {
        self.stop_pools().await;
    }
}

pub async fn history_of(workspace: &Workspace) -> Vec<Event> {
    JobHistory::open(workspace).replay().await.unwrap()
}

/// Count events of `event_type` recorded for `activity`
pub fn count_events(events: &[Event], event_type: EventType, activity: &str) -> usize {
    events
        .iter()
        .filter(|e| e.event_type == event_type && e.activity.as_deref() == Some(activity))
        .count()
}

async fn top_left(workspace: &Workspace, frame: &Artifact) -> PipelineResult<[u8; 4]> {
    let image = load_frame(workspace, frame).await?;
    Ok(image.to_rgba8().get_pixel(0, 0).0)
}

/// Identity after a random delay, so completions arrive out of order
pub struct Jitter;

#[async_trait]
impl Operation for Jitter {
    fn name(&self) -> &str {
        "jitter"
    }

    fn description(&self) -> &str {
        "identity with random latency"
    }

    async fn execute(
        &self,
        _workspace: &Workspace,
        frame: &Artifact,
        _args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let delay_ms: u64 = rand::random_range(0..40);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(vec![frame.clone()])
    }
}

/// Fails on frames of one colour while `armed`; counts every call
pub struct FailOnColor {
    pub color: [u8; 4],
    pub armed: AtomicBool,
    pub calls: AtomicUsize,
}

impl FailOnColor {
    pub fn new(color: [u8; 4]) -> Arc<Self> {
        Arc::new(Self {
            color,
            armed: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operation for FailOnColor {
    fn name(&self) -> &str {
        "fail_on_color"
    }

    fn description(&self) -> &str {
        "identity that fails on one colour"
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        frame: &Artifact,
        _args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.armed.load(Ordering::SeqCst) && top_left(workspace, frame).await? == self.color {
            return Err(transform_error("injected fault"));
        }
        Ok(vec![frame.clone()])
    }
}

/// Panics on the first `crashes` calls, then behaves like identity
pub struct Crashy {
    pub crashes: usize,
    pub calls: AtomicUsize,
}

impl Crashy {
    pub fn new(crashes: usize) -> Arc<Self> {
        Arc::new(Self {
            crashes,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operation for Crashy {
    fn name(&self) -> &str {
        "crashy"
    }

    fn description(&self) -> &str {
        "panics a few times before succeeding"
    }

    async fn execute(
        &self,
        _workspace: &Workspace,
        frame: &Artifact,
        _args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.crashes {
            panic!("simulated worker crash {}", call);
        }
        Ok(vec![frame.clone()])
    }
}

/// Returns a retryable error on the first `failures` calls
pub struct Flaky {
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl Flaky {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Operation for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "fails transiently"
    }

    async fn execute(
        &self,
        _workspace: &Workspace,
        frame: &Artifact,
        _args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(transform_error(format!("transient failure {}", call)));
        }
        Ok(vec![frame.clone()])
    }
}

/// Sleeps for a long time
pub struct Stall(pub Duration);

#[async_trait]
impl Operation for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    fn description(&self) -> &str {
        "sleeps before returning"
    }

    async fn execute(
        &self,
        _workspace: &Workspace,
        frame: &Artifact,
        _args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        tokio::time::sleep(self.0).await;
        Ok(vec![frame.clone()])
    }
}
