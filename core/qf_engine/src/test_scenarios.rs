use crate::clr::{predict, predict_round, PredictionConfig};
use crate::types::{Address, Contribution, GrantId, TrustScores, PREDICTION_POINTS};

fn payer(n: u8) -> Address {
    Address::from_bytes([n; 20])
}

fn round_address() -> Address {
    Address::from_bytes([0xaa; 20])
}

fn donate(grant: u64, from: u8, amount: f64) -> Contribution {
    Contribution {
        tx_hash: format!("0x{grant:04x}{from:04x}"),
        payer: payer(from),
        grant_id: GrantId(grant),
        rounds: vec![round_address()],
        amount,
    }
}

fn trusted(payers: &[u8]) -> TrustScores {
    let mut scores = TrustScores::new();
    for p in payers {
        scores.insert(payer(*p), 1.0);
    }
    scores
}

const A: GrantId = GrantId(1);
const B: GrantId = GrantId(2);

#[test]
fn single_contributors_earn_no_match() {
    let contributions = [donate(1, 1, 100.0), donate(2, 2, 400.0)];
    let predictions = predict_round(
        &[A, B],
        &contributions,
        &trusted(&[1, 2]),
        1000.0,
        18,
        &[0.0],
        &PredictionConfig::default(),
    );
    for p in &predictions {
        assert_eq!(p.samples.len(), 1);
        assert_eq!(p.samples[0].predicted_grant_match, 0.0);
        assert_eq!(p.samples[0].prediction_diff, 0.0);
    }
}

#[test]
fn two_contributors_take_whole_pot_when_others_have_no_weight() {
    let contributions = [donate(1, 1, 100.0), donate(1, 2, 100.0), donate(2, 3, 400.0)];
    let p = predict(
        A,
        &contributions,
        &trusted(&[1, 2, 3]),
        1000.0,
        18,
        &[0.0],
        &PredictionConfig::default(),
    );
    assert_eq!(p.samples[0].predicted_grant_match, 1000.0);

    let b = predict(
        B,
        &contributions,
        &trusted(&[1, 2, 3]),
        1000.0,
        18,
        &[0.0],
        &PredictionConfig::default(),
    );
    assert_eq!(b.samples[0].predicted_grant_match, 0.0);
}

#[test]
fn grant_without_contributions_gets_valid_zero_baseline() {
    let contributions = [donate(2, 1, 50.0), donate(2, 2, 50.0)];
    let p = predict(
        GrantId(42),
        &contributions,
        &trusted(&[1, 2]),
        1000.0,
        18,
        &PREDICTION_POINTS,
        &PredictionConfig::default(),
    );
    assert_eq!(p.grant_id, GrantId(42));
    assert_eq!(p.samples.len(), PREDICTION_POINTS.len());
    assert_eq!(p.samples[0].predicted_grant_match, 0.0);
    for s in &p.samples {
        assert!(s.predicted_grant_match >= 0.0);
        assert!(s.prediction_diff >= 0.0);
    }
}

#[test]
fn positive_points_raise_match_once_grant_has_a_donor() {
    // One real donor plus the synthetic one gives the grant a pairwise term.
    let contributions = [donate(1, 1, 10.0), donate(2, 2, 50.0), donate(2, 3, 50.0)];
    let p = predict(
        A,
        &contributions,
        &trusted(&[1, 2, 3]),
        1000.0,
        18,
        &PREDICTION_POINTS,
        &PredictionConfig::default(),
    );
    assert_eq!(p.samples[0].predicted_grant_match, 0.0);
    for s in p.samples.iter().skip(1) {
        assert!(s.predicted_grant_match > 0.0, "point {}", s.prediction_point);
        assert!(s.prediction_diff > 0.0);
    }
}

#[test]
fn other_grants_shrink_as_target_grows() {
    let contributions = [
        donate(1, 1, 10.0),
        donate(1, 2, 10.0),
        donate(2, 3, 10.0),
        donate(2, 4, 10.0),
    ];
    let trust = trusted(&[1, 2, 3, 4]);
    let config = PredictionConfig::default();
    let a = predict(A, &contributions, &trust, 1000.0, 18, &[0.0, 100.0], &config);
    assert_eq!(a.samples[0].predicted_grant_match, 500.0);
    // With a hypothetical 100 the denominator grows, so A's share rises above half.
    assert!(a.samples[1].predicted_grant_match > 500.0);
    assert!(a.samples[1].predicted_grant_match < 1000.0);
}

#[test]
fn synthetic_trust_dampens_prediction() {
    let contributions = [donate(1, 1, 10.0), donate(2, 2, 10.0), donate(2, 3, 10.0)];
    let trust = trusted(&[1, 2, 3]);
    let full = predict(A, &contributions, &trust, 1000.0, 18, &[100.0], &PredictionConfig::default());
    let damped = predict(
        A,
        &contributions,
        &trust,
        1000.0,
        18,
        &[100.0],
        &PredictionConfig {
            synthetic_trust: 0.25,
            ..PredictionConfig::default()
        },
    );
    assert!(damped.samples[0].predicted_grant_match < full.samples[0].predicted_grant_match);
}
