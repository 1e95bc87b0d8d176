//! Property-based tests for the loss, projections and encoder.
//!
//! # Margin Loss
//!
//! Per item: `max(0, γ + ||d⁺|| - ||d⁻||)`, batch loss is the sum.
//!
//! - Zero exactly when `||d⁺|| + γ <= ||d⁻||`
//! - Otherwise equal to `γ + ||d⁺|| - ||d⁻||`
//!
//! # TransD
//!
//! With `relation_mapping = 0` both projection matrices are the identity,
//! so the displacement is plain `h + r - t`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use candle_core::{DType, Device, Tensor};
use lattix_textkge::loss::{per_item_margin, margin_ranking_loss, NormOrder};
use lattix_textkge::scoring::RELATION_MAPPING;
use lattix_textkge::{EmbeddingModule, Encoder, LrSchedule, ModelConfig, ScoringKind, TokenVectors};
use proptest::prelude::*;
use std::sync::Arc;

fn l2(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn tensor(rows: &[Vec<f32>]) -> Tensor {
    let cols = rows[0].len();
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::from_vec(flat, (rows.len(), cols), &Device::Cpu).unwrap()
}

/// `n` rows of width `d` with entries in [-5, 5].
fn batch(n: usize, d: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-5.0f32..5.0, d), n)
}

fn pair() -> impl Strategy<Value = (Vec<Vec<f32>>, Vec<Vec<f32>>)> {
    (1usize..6, 1usize..6).prop_flat_map(|(n, d)| (batch(n, d), batch(n, d)))
}

mod loss_props {
    use super::*;

    proptest! {
        #[test]
        fn item_matches_hinge((pos, neg) in pair(), gamma in 0.0f64..3.0) {
            let items = per_item_margin(&tensor(&pos), &tensor(&neg), gamma, NormOrder::L2)
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();

            for (i, item) in items.iter().enumerate() {
                let margin = gamma as f32 + l2(&pos[i]) - l2(&neg[i]);
                if margin <= 0.0 {
                    prop_assert!(item.abs() < 1e-5, "expected 0, got {}", item);
                } else {
                    prop_assert!((item - margin).abs() < 1e-3, "expected {}, got {}", margin, item);
                }
            }
        }

        #[test]
        fn batch_loss_is_sum_of_items((pos, neg) in pair(), gamma in 0.0f64..3.0) {
            let (p, n) = (tensor(&pos), tensor(&neg));
            for order in [NormOrder::L1, NormOrder::L2] {
                let items: f32 = per_item_margin(&p, &n, gamma, order).unwrap().to_vec1::<f32>().unwrap().iter().sum();
                let total = margin_ranking_loss(&p, &n, gamma, order).unwrap().to_scalar::<f32>().unwrap();
                prop_assert!((items - total).abs() < 1e-3);
                prop_assert!(total >= 0.0);
            }
        }

        #[test]
        fn identical_sides_cost_gamma(rows in batch(3, 4), gamma in 0.0f64..3.0) {
            let t = tensor(&rows);
            let total = margin_ranking_loss(&t, &t, gamma, NormOrder::L2).unwrap().to_scalar::<f32>().unwrap();
            prop_assert!((total - 3.0 * gamma as f32).abs() < 1e-4);
        }
    }
}

mod projection_props {
    use super::*;

    const DIM: usize = 4;

    fn transd() -> EmbeddingModule {
        let pairs = vec![("x", vec![0.0; DIM])];
        let vectors = Arc::new(TokenVectors::from_pairs(DIM, pairs).unwrap());
        let config = ModelConfig::default()
            .with_dim(DIM)
            .with_kind(ScoringKind::LowRankRelational);
        let mut module = EmbeddingModule::new(config, vectors).unwrap();
        let zero = Tensor::zeros((DIM, 1), DType::F32, &Device::Cpu).unwrap();
        module.set_parameter(RELATION_MAPPING, &zero).unwrap();
        module
    }

    proptest! {
        #[test]
        fn transd_zero_relation_mapping_is_translation(
            h in batch(2, DIM),
            r in batch(2, DIM),
            t in batch(2, DIM),
        ) {
            let module = transd();
            let d = module
                .displacement(&tensor(&h), &tensor(&r), &tensor(&t))
                .unwrap()
                .to_vec2::<f32>()
                .unwrap();
            for i in 0..2 {
                for j in 0..DIM {
                    let expected = h[i][j] + r[i][j] - t[i][j];
                    prop_assert!((d[i][j] - expected).abs() < 1e-4);
                }
            }
        }

        #[test]
        fn predict_middle_third_is_relation(
            h in batch(1, DIM),
            r in batch(1, DIM),
            t in batch(1, DIM),
            linear in any::<bool>(),
        ) {
            let module = if linear {
                let vectors = Arc::new(TokenVectors::with_dim(DIM));
                EmbeddingModule::new(ModelConfig::default().with_dim(DIM), vectors).unwrap()
            } else {
                transd()
            };
            let out = module.predict(&tensor(&h), &tensor(&r), &tensor(&t)).unwrap().to_vec2::<f32>().unwrap();
            prop_assert_eq!(out[0].len(), 3 * DIM);
            prop_assert_eq!(&out[0][DIM..2 * DIM], &r[0][..]);
        }
    }
}

mod encoder_props {
    use super::*;

    proptest! {
        #[test]
        fn single_token_is_unchanged(word in "[a-z]{1,10}", v in prop::collection::vec(-10.0f32..10.0, 3)) {
            let vectors = TokenVectors::from_pairs(3, vec![(word.clone(), v.clone())]).unwrap();
            let encoder = Encoder::new(Arc::new(vectors));
            prop_assert_eq!(encoder.encode(&word.to_uppercase()), Some(v));
        }

        #[test]
        fn non_alphabetic_text_has_no_vector(text in "[0-9 .,;!?-]{0,20}") {
            let vectors = TokenVectors::from_pairs(2, vec![("a", vec![1.0, 1.0])]).unwrap();
            let encoder = Encoder::new(Arc::new(vectors));
            prop_assert_eq!(encoder.encode(&text), None);
        }
    }
}

mod schedule_props {
    use super::*;

    proptest! {
        #[test]
        fn lr_never_increases(base in 1e-5f64..1.0, every in 1usize..50, factor in 1.0f64..10.0, epoch in 0usize..500) {
            let s = LrSchedule { base, every, factor };
            prop_assert!(s.lr(epoch + 1) <= s.lr(epoch));
            prop_assert!(s.lr(epoch) > 0.0);
            prop_assert_eq!(s.lr(epoch % every), base);
        }
    }
}
