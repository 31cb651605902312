// demos/compact_mask.rs -- end-to-end compaction demo.
//
//   RUST_LOG=debug cargo run --example compact_mask
//
// Uploads a synthetic candidate mask plus a score map, runs the
// single-scale detector pipeline on the GPU, reads the packed keypoint
// texture back and prints the decoded records.

use std::error::Error;
use std::sync::Arc;

use keypack::compaction::{CandidateMask, CompactionStrategy};
use keypack::encoding::KeypointEncoding;
use keypack::gpu::{GpuContext, GpuDevice, SingleScaleDetector, TexturePool, TextureSource};
use keypack::pipeline::Pipeline;

const WIDTH: u32 = 128;
const HEIGHT: u32 = 96;
const CAPACITY: usize = 64;

/// Candidates on a diagonal plus a small cluster — enough structure to
/// see raster ordering and truncation in the output.
fn make_mask() -> CandidateMask {
    let mut mask = CandidateMask::new(WIDTH, HEIGHT);
    for i in 0..HEIGHT.min(WIDTH) {
        if i % 5 == 0 {
            mask.set(i, i);
        }
    }
    for dy in 0..3 {
        for dx in 0..3 {
            mask.set(100 + dx, 20 + dy);
        }
    }
    mask
}

/// Score map: score rises with x (8.8 fixed point), rotation and level
/// bytes zero.
fn make_scores() -> Vec<u8> {
    let mut bytes = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let score = (x as u32 * 2) << 8; // x*2 in 8.8
            let i = ((y * WIDTH + x) * 4) as usize;
            bytes[i] = (score & 0xff) as u8;
            bytes[i + 1] = ((score >> 8) & 0xff) as u8;
        }
    }
    bytes
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let gpu = Arc::new(GpuDevice::new()?);
    println!("{gpu}");
    let pool = Arc::new(TexturePool::new());
    let mut cx = GpuContext::new(gpu.clone(), pool.clone());

    let mask = make_mask();
    println!("mask: {}×{}, {} candidates", WIDTH, HEIGHT, mask.count());

    let mask_tex = pool.acquire(&gpu, WIDTH, HEIGHT)?;
    mask_tex.upload(&gpu, &mask.to_rgba_bytes());
    let scores_tex = pool.acquire(&gpu, WIDTH, HEIGHT)?;
    scores_tex.upload(&gpu, &make_scores());

    let mut mask_source = TextureSource::new("mask source");
    mask_source.set_texture(mask_tex.clone());
    let mut scores_source = TextureSource::new("scores source");
    scores_source.set_texture(scores_tex.clone());
    let detector = SingleScaleDetector::new(
        WIDTH,
        HEIGHT,
        KeypointEncoding::new(0, 0),
        CAPACITY,
        CompactionStrategy::SkipOffset,
    );

    let mut pipeline = Pipeline::new();
    let mask_id = pipeline.add_node(Box::new(mask_source));
    let scores_id = pipeline.add_node(Box::new(scores_source));
    let detector_id = pipeline.add_node(Box::new(detector));
    pipeline.connect(mask_id, "texture", detector_id, "mask")?;
    pipeline.connect(scores_id, "texture", detector_id, "scores")?;

    pipeline.init(&mut cx)?;
    pipeline.run(&mut cx)?;

    let encoded = pipeline
        .output(detector_id, "keypoints")
        .and_then(|m| m.as_keypoints())
        .ok_or("detector produced no keypoints message")?
        .clone();
    let bytes = encoded.read_back(&gpu).wait(&gpu)?;
    let keypoints = encoded.decode(&bytes);

    println!(
        "encoded texture: {0}×{0}, capacity {1} — decoded {2} keypoints",
        encoded.length,
        encoded.capacity,
        keypoints.len()
    );
    for (i, kp) in keypoints.iter().enumerate() {
        println!(
            "  [{i:2}] ({:6.1}, {:6.1})  score {:7.2}  lod {:.1}",
            kp.x, kp.y, kp.score, kp.lod
        );
    }

    pipeline.release(&mut cx)?;
    pool.release(mask_tex);
    pool.release(scores_tex);
    pool.dispose();
    Ok(())
}
