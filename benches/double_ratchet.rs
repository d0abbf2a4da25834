use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand_core::OsRng;
use ratchet_session::{
    Aes256GcmBackend, ChaCha20Poly1305Backend, CryptoBackend, IdentityKeyPair, PreKeyConfig,
    PreKeyManager, Session, SessionConfig,
};

fn setup_sessions<B: CryptoBackend + Copy>(backend: B) -> (Session<B>, Session<B>) {
    let mut bob_keys =
        PreKeyManager::new(IdentityKeyPair::generate(&mut OsRng), PreKeyConfig::default()).unwrap();
    bob_keys.generate_signed_pre_key(&mut OsRng, 1).unwrap();
    bob_keys.generate_pre_key_batch(&mut OsRng, 1).unwrap();

    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let mut alice = Session::new(backend, SessionConfig::default()).unwrap();
    let handshake = alice
        .initiate(&mut OsRng, &alice_identity, &bob_keys.bundle().unwrap())
        .unwrap();

    let mut bob = Session::new(backend, SessionConfig::default()).unwrap();
    bob.accept(&bob_keys, &handshake).unwrap();

    (alice, bob)
}

fn bench_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("encryption");
    let message = vec![0u8; 1024];

    let (mut alice, _) = setup_sessions(Aes256GcmBackend);
    group.bench_function("aes_gcm_1kb", |b| {
        b.iter(|| black_box(alice.encrypt(&message).unwrap()));
    });

    let (mut alice, _) = setup_sessions(ChaCha20Poly1305Backend);
    group.bench_function("chacha20_1kb", |b| {
        b.iter(|| black_box(alice.encrypt(&message).unwrap()));
    });

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    for size in [128usize, 1024, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &size, |b, &size| {
            let (mut alice, _) = setup_sessions(Aes256GcmBackend);
            let message = vec![0u8; size];
            b.iter(|| black_box(alice.encrypt(&message).unwrap()));
        });

        // Every message is new to bob, so decrypt keeps advancing the chain
        group.bench_with_input(BenchmarkId::new("decrypt", size), &size, |b, &size| {
            let (mut alice, mut bob) = setup_sessions(Aes256GcmBackend);
            let message = vec![0u8; size];
            b.iter_batched(
                || alice.encrypt(&message).unwrap(),
                |envelope| black_box(bob.decrypt(&envelope).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_bidirectional(c: &mut Criterion) {
    let mut group = c.benchmark_group("bidirectional");

    group.bench_function("ping_pong_10", |b| {
        b.iter(|| {
            let (mut alice, mut bob) = setup_sessions(Aes256GcmBackend);
            let message = vec![0u8; 256];

            for _ in 0..5 {
                let env = alice.encrypt(&message).unwrap();
                bob.decrypt(&env).unwrap();

                let env = bob.encrypt(&message).unwrap();
                alice.decrypt(&env).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_out_of_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("out_of_order");

    group.bench_function("skip_5_messages", |b| {
        b.iter(|| {
            let (mut alice, mut bob) = setup_sessions(Aes256GcmBackend);
            let message = vec![0u8; 256];

            let encrypted: Vec<_> = (0..6).map(|_| alice.encrypt(&message).unwrap()).collect();

            // 5 first, then the skipped 0..=4
            bob.decrypt(&encrypted[5]).unwrap();
            for envelope in encrypted.iter().take(5) {
                bob.decrypt(envelope).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    let (mut alice, mut bob) = setup_sessions(Aes256GcmBackend);
    let message = vec![0u8; 64];
    // leave some skipped keys in the window
    let envelopes: Vec<_> = (0..50).map(|_| alice.encrypt(&message).unwrap()).collect();
    bob.decrypt(&envelopes[49]).unwrap();

    let blob = bob.serialize().unwrap();

    group.bench_function("serialize", |b| {
        b.iter(|| black_box(bob.serialize().unwrap()));
    });

    group.bench_function("restore", |b| {
        b.iter(|| {
            black_box(Session::restore(Aes256GcmBackend, SessionConfig::default(), &blob).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encryption,
    bench_throughput,
    bench_bidirectional,
    bench_out_of_order,
    bench_snapshot
);

criterion_main!(benches);
