use idealem_core::compression::similarity::{ks_2samp, ks_exchangeable, normalize};
use idealem_core::compression::{
    CompressorConfig, Decoder, EncodedStream, Encoder, EncoderState, MatchMode, PolicyKind, Token,
};
use idealem_core::generate_timestamps;
use proptest::prelude::*;

fn fixed(block_size: usize, num_buffers: usize) -> Encoder {
    Encoder::new(CompressorConfig::fixed(block_size, num_buffers)).unwrap()
}

fn adaptive(policy: PolicyKind, seed: u64) -> Encoder {
    Encoder::new(CompressorConfig {
        policy,
        seed: Some(seed),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_scenario_hit_ratio() {
    let values = [
        10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0,
        13.0, 20.0, 21.0, 22.0, 23.0,
    ];
    let encoder = Encoder::new(CompressorConfig {
        similarity_threshold: 0.01,
        ..CompressorConfig::fixed(4, 2)
    })
    .unwrap();
    let compressed = encoder.compress(&values).unwrap();

    assert_eq!(compressed.metadata.hit_ratio, 2.0 / 5.0);
    assert_eq!(compressed.metadata.original_length, 20);
    assert_eq!(compressed.metadata.compression_ratio, 0.0);
    assert_eq!(compressed.decompress().unwrap(), values);
}

#[test]
fn test_scenario_single_overwrite() {
    let values = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, -5.0, 3.0, 5.0, 80.0];
    let compressed = fixed(4, 2).compress(&values).unwrap();

    let wire = serde_json::to_value(&compressed.stream).unwrap();
    let items = wire.as_array().unwrap();
    let markers: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, v)| v.as_u64() == Some(0xFF))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(markers.len(), 1);
    assert_eq!(items[markers[0] + 1].as_u64(), Some(0));
}

#[test]
fn test_scenario_change_block_size() {
    let mut state = EncoderState::new(8, 16);
    state.change_block_size(16);

    let wire = serde_json::to_value(EncodedStream::from_tokens(state.stream().to_vec())).unwrap();
    assert_eq!(wire, serde_json::json!([0xFE, 16]));
    assert!(state.pool().is_empty());
}

#[test]
fn test_scenario_constant_block() {
    let block = [7.25; 24];
    assert!(normalize(&block).iter().all(|&v| v == 0.0));
    assert_eq!(ks_2samp(&block, &block).unwrap().p_value, 1.0);
    assert!(ks_exchangeable(&block, &block, 0.999));
}

#[test]
fn test_scenario_timestamps() {
    assert_eq!(
        generate_timestamps("2024-01-01T00:00:00", "2024-01-01T01:00:00", 3).unwrap(),
        vec![
            "2024-01-01T00:00:00",
            "2024-01-01T00:30:00",
            "2024-01-01T01:00:00"
        ]
    );
}

#[test]
fn test_scenario_insufficient_data() {
    let encoder = Encoder::new(CompressorConfig::default()).unwrap();
    assert!(encoder.compress(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_none());
}

#[test]
fn test_roundtrip_through_json() {
    let values: Vec<f64> = (0..600)
        .map(|i| ((i % 48) as f64 * 0.3).sin() + if i > 300 { 0.1 } else { 0.0 })
        .collect();
    let compressed = adaptive(PolicyKind::Windowed, 3).compress(&values).unwrap();

    let json = compressed.stream.to_json().unwrap();
    let parsed = EncodedStream::from_json(&json).unwrap();
    assert_eq!(parsed, compressed.stream);

    let restored = idealem_core::compression::decompress(parsed.tokens(), &compressed.metadata).unwrap();
    assert_eq!(restored.len(), values.len());
    for (a, b) in values.iter().zip(&restored) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn test_shape_mode_replays_buffers() {
    let values = [1.0, 2.0, 3.0, 4.0, 101.0, 102.0, 103.0, 104.0, 1.0, 2.0, 3.0, 4.0];
    let encoder = Encoder::new(CompressorConfig {
        match_mode: MatchMode::Shape,
        ..CompressorConfig::fixed(4, 4)
    })
    .unwrap();
    let compressed = encoder.compress(&values).unwrap();
    assert_eq!(compressed.hits, 2);
    assert_eq!(
        compressed.decompress().unwrap(),
        [1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]
    );
}

prop_compose! {
    /// Series over a tiny alphabet so identical blocks actually recur
    fn arb_series(min_len: usize, max_len: usize)(
        values in prop::collection::vec(0u8..3, min_len..max_len),
        scale in prop::sample::select(vec![1.0, 0.1, -2.5, 1e-3]),
    ) -> Vec<f64> {
        values.into_iter().map(|v| v as f64 * scale).collect()
    }
}

proptest! {
    /// Property: fixed block size streams decode to the exact input
    #[test]
    fn prop_roundtrip_fixed(
        values in arb_series(4, 400),
        block_size in 1usize..16,
        num_buffers in 1usize..20,
    ) {
        prop_assume!(values.len() >= block_size.min(12));
        let compressed = fixed(block_size, num_buffers).compress(&values).unwrap();
        let restored = compressed.decompress().unwrap();
        prop_assert_eq!(restored, values);
    }

    /// Property: pool never exceeds capacity and evictions always hit slot 0
    #[test]
    fn prop_capacity_and_fifo(
        values in arb_series(4, 300),
        block_size in 1usize..8,
        num_buffers in 1usize..6,
    ) {
        let mut state = EncoderState::new(block_size, num_buffers);
        for block in values.chunks(block_size) {
            state.encode_block(block, 0.8, MatchMode::Exact);
            prop_assert!(state.pool().len() <= num_buffers);
        }

        let mut decoder = Decoder::new(num_buffers);
        for token in state.stream() {
            if let Token::Overwrite { slot, .. } = token {
                prop_assert_eq!(*slot, 0);
            }
            decoder.apply(token).unwrap();
            prop_assert!(decoder.pool().len() <= num_buffers);
        }
        prop_assert_eq!(decoder.finish(values.len()).unwrap(), values);
    }

    /// Property: hit ratio counts HIT tokens over processed blocks
    #[test]
    fn prop_hit_ratio(
        values in arb_series(12, 400),
        block_size in 1usize..12,
        num_buffers in 1usize..10,
    ) {
        let compressed = fixed(block_size, num_buffers).compress(&values).unwrap();
        let hits = compressed.stream.tokens().iter().filter(|t| t.is_hit()).count();
        let blocks = values.len().div_ceil(block_size);
        prop_assert_eq!(compressed.total_blocks, blocks);
        prop_assert_eq!(compressed.metadata.hit_ratio, hits as f64 / blocks as f64);
    }

    /// Property: KS exchangeability is symmetric
    #[test]
    fn prop_similarity_symmetric(
        (a, b) in (1usize..40).prop_flat_map(|n| (
            prop::collection::vec(-1e3f64..1e3, n),
            prop::collection::vec(-1e3f64..1e3, n),
        )),
        threshold in 0.0f64..1.0,
    ) {
        prop_assert_eq!(ks_exchangeable(&a, &b, threshold), ks_exchangeable(&b, &a, threshold));
    }

    /// Property: inputs shorter than the minimum block size are skipped
    #[test]
    fn prop_insufficient_data(values in prop::collection::vec(-1e6f64..1e6, 0..12)) {
        let encoder = Encoder::new(CompressorConfig::default()).unwrap();
        prop_assert!(encoder.compress(&values).is_none());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: adaptive streams round trip and never HIT right after a resize
    #[test]
    fn prop_adaptive_roundtrip(
        values in arb_series(12, 360),
        seed in any::<u64>(),
        stability in any::<bool>(),
    ) {
        let policy = if stability { PolicyKind::StabilityScore } else { PolicyKind::Windowed };
        let compressed = adaptive(policy, seed).compress(&values).unwrap();

        let tokens = compressed.stream.tokens();
        for pair in tokens.windows(2) {
            if let Token::Resize(_) = pair[0] {
                prop_assert!(!pair[1].is_hit());
            }
        }
        prop_assert!(!matches!(tokens.last(), Some(Token::Resize(_))));
        prop_assert_eq!(compressed.decompress().unwrap(), values);
    }
}
