use std::sync::Arc;

use secrecy::SecretString;
use snapfile_crypto::{
    decrypt_text, derive_key, encrypt_text, ChunkCodec, ChunkDecryptor, ChunkEncryptor,
    KdfParams, SessionKey,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn bench_key() -> Arc<SessionKey> {
    Arc::new(SessionKey::from_bytes([0xABu8; 32]))
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_chunk(bencher: divan::Bencher, size: usize) {
    let codec = ChunkCodec::default();
    let key = bench_key();
    let iv = ChunkCodec::generate_iv();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            codec
                .encrypt_chunk(divan::black_box(&key), &iv, divan::black_box(&data))
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_chunk(bencher: divan::Bencher, size: usize) {
    let codec = ChunkCodec::default();
    let key = bench_key();
    let iv = ChunkCodec::generate_iv();
    let encrypted = codec.encrypt_chunk(&key, &iv, &make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            codec
                .decrypt_chunk(divan::black_box(&key), &iv, divan::black_box(&encrypted))
                .unwrap()
        });
}

/// 4 MiB body pushed through a 256 KiB codec in 64 KiB reads
#[divan::bench]
fn bench_stream_roundtrip(bencher: divan::Bencher) {
    let size = 4 * 1024 * 1024;
    let codec = ChunkCodec::new(256 * 1024).unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut enc = ChunkEncryptor::new(bench_key(), codec);
            let mut dec = ChunkDecryptor::new(bench_key(), codec);
            let mut out = 0usize;
            for read in data.chunks(64 * 1024) {
                for unit in enc.update(read).unwrap() {
                    out += dec.update(&unit).unwrap().iter().map(|p| p.len()).sum::<usize>();
                }
            }
            if let Some(last) = enc.finish().unwrap() {
                out += dec.update(&last).unwrap().iter().map(|p| p.len()).sum::<usize>();
            }
            out += dec.finish().unwrap().map_or(0, |p| p.len());
            assert_eq!(out, size);
        });
}

#[divan::bench(args = [64, 4096])]
fn bench_text_envelope(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let text = "x".repeat(size);
    bencher.bench(|| {
        let envelope = encrypt_text(&key, divan::black_box(&text)).unwrap();
        decrypt_text(&key, &envelope).unwrap()
    });
}

#[divan::bench(sample_count = 5)]
fn bench_derive_key_default_iterations() {
    let passcode = SecretString::from("correct horse battery staple");
    derive_key(divan::black_box(&passcode), &KdfParams::default()).unwrap();
}

fn main() {
    divan::main();
}
