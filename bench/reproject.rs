use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cv_dibr::prelude::*;
use image::{Rgb, RgbImage};

fn reproject_bench(c: &mut Criterion) {
    let width = 640;
    let height = 480;

    // Build a gradient frame
    let mut frame = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = ((x + y) % 256) as u8;
            frame.put_pixel(x, y, Rgb([v, v, 255 - v]));
        }
    }

    // Build a full-range horizontal depth ramp and scale it to disparity
    let mut depth = DepthField::new(width, height);
    for y in 0..height {
        for x in 0..width {
            depth.put(x, y, x as f32 / (width - 1) as f32);
        }
    }
    let disparity = DisparityMap::from_depth(&depth, 30.0);

    // Benchmark the stereo pair synthesis
    c.bench_function("reproject 640x480 d30", |b| {
        b.iter(|| reproject(black_box(&frame), black_box(&disparity)))
    });

    // Benchmark compositing on top of reprojection
    let (left, right) = reproject(&frame, &disparity).unwrap();
    c.bench_function("composite full-width 640x480", |b| {
        b.iter(|| composite(black_box(&left), black_box(&right), SbsLayout::FullWidth))
    });
}

criterion_group!(benches, reproject_bench);
criterion_main!(benches);
