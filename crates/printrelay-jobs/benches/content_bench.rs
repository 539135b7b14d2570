// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for base64 content decoding, ZPL setup block
// construction, and payload hashing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sha2::{Digest, Sha256};

use printrelay_jobs::decode_base64;
use printrelay_print::zpl::{self, PrinterInfo, ZplSetup};

/// A label-sized ZPL payload (~4 KiB).
fn sample_label() -> Vec<u8> {
    let mut zpl = String::from("^XA\n");
    for row in 0..100 {
        zpl.push_str(&format!("^FO50,{}^A0N,30,30^FDLine {row}^FS\n", row * 40));
    }
    zpl.push_str("^XZ\n");
    zpl.into_bytes()
}

fn bench_base64(c: &mut Criterion) {
    let label = sample_label();
    let padded = STANDARD.encode(&label);
    let stripped = padded.trim_end_matches('=').to_string();
    let data_uri = format!("data:application/octet-stream;base64,{padded}");

    let mut group = c.benchmark_group("decode_base64");
    group.bench_function("padded", |b| b.iter(|| decode_base64(black_box(&padded))));
    group.bench_function("stripped_padding", |b| {
        b.iter(|| decode_base64(black_box(&stripped)))
    });
    group.bench_function("data_uri", |b| b.iter(|| decode_base64(black_box(&data_uri))));
    group.finish();
}

fn bench_zpl_setup(c: &mut Criterion) {
    let label = sample_label();
    let info = PrinterInfo::parse_response("\"203\" \"812\" \"15\"");
    let setup = ZplSetup::from_info(&info);

    c.bench_function("zpl_parse_probe_response", |b| {
        b.iter(|| PrinterInfo::parse_response(black_box("\"203\" \"812\" \"15\"")))
    });
    c.bench_function("zpl_apply_setup", |b| {
        b.iter(|| setup.apply(black_box(label.clone())))
    });
    c.bench_function("zpl_has_setup_commands", |b| {
        b.iter(|| zpl::has_setup_commands(black_box(&label)))
    });
}

fn bench_hash(c: &mut Criterion) {
    let label = sample_label();
    c.bench_function("sha256_label", |b| {
        b.iter(|| hex::encode(Sha256::digest(black_box(&label))))
    });
}

criterion_group!(benches, bench_base64, bench_zpl_setup, bench_hash);
criterion_main!(benches);
