//! Matcher (C5): the four-strategy batched resolver (§4.5).
//!
//! String-ratio scoring is grounded on `wkmp-ai`'s
//! `fusion/fusers/identity_resolver.rs`, which uses
//! `strsim::normalized_levenshtein` for artist/title similarity; the
//! vector fallback uses `crate::vector::VectorIndex`.

use crate::bridge;
use crate::config::ThresholdConfig;
use crate::discovery;
use crate::library;
use crate::normalize;
use crate::vector::VectorIndex;
use airwave_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub raw_artist: String,
    pub raw_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCategory {
    AutoLink,
    Review,
    Reject,
    IdentityBridge,
    NoMatch,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchScores {
    pub artist_sim: f64,
    pub title_sim: f64,
    pub vector_distance: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Match {
    pub work_id: Option<i64>,
    pub recording_id: Option<i64>,
    pub category: MatchCategory,
    pub reason: String,
    pub scores: MatchScores,
    pub signature: String,
}

fn string_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// `clean_title` plus `extract_version`, so the comparison title matches
/// the version-stripped form the Library KB stores on `Work.title`.
fn normalized_query_title(raw_title: &str) -> String {
    let (cleaned, _collaborators) = normalize::clean_title(raw_title);
    normalize::extract_version(&cleaned, None).0
}

/// Three-range decision shared by strategies 3 and 4's guard (§4.5, §8
/// "three-range totality"/"threshold monotonicity").
pub fn classify(artist_sim: f64, title_sim: f64, thresholds: &ThresholdConfig) -> MatchCategory {
    if artist_sim >= thresholds.artist_auto && title_sim >= thresholds.title_auto {
        MatchCategory::AutoLink
    } else if artist_sim >= thresholds.artist_review && title_sim >= thresholds.title_review {
        MatchCategory::Review
    } else {
        MatchCategory::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    TruncationRisk,
    LengthMismatch,
    ExtraText,
    CaseOnly,
    NearAuto,
    NearReview,
}

/// Edge-case policy for match quality (§4.5), surfaced in UI, never in
/// the auto/review/reject decision itself.
pub fn quality_flags(raw: &str, matched: &str, scores: &MatchScores, thresholds: &ThresholdConfig) -> Vec<QualityFlag> {
    let mut flags = Vec::new();
    if !raw.is_empty() && (matched.len() as f64) / (raw.len() as f64) < 0.6 {
        flags.push(QualityFlag::TruncationRisk);
    }
    if (raw.len() as i64 - matched.len() as i64).abs() > 30 {
        flags.push(QualityFlag::LengthMismatch);
    }
    if (matched.contains("feat") || matched.contains("remix"))
        && !raw.to_lowercase().contains("feat")
        && !raw.to_lowercase().contains("remix")
    {
        flags.push(QualityFlag::ExtraText);
    }
    if raw.to_lowercase() == matched.to_lowercase() && raw != matched {
        flags.push(QualityFlag::CaseOnly);
    }
    let near = |sim: f64, threshold: f64| (sim - threshold).abs() <= 0.05;
    if near(scores.artist_sim, thresholds.artist_auto) || near(scores.title_sim, thresholds.title_auto) {
        flags.push(QualityFlag::NearAuto);
    }
    if near(scores.artist_sim, thresholds.artist_review) || near(scores.title_sim, thresholds.title_review) {
        flags.push(QualityFlag::NearReview);
    }
    flags
}

struct VariantCandidate {
    work_id: i64,
    recording_id: i64,
    artist_sim: f64,
    title_sim: f64,
    is_verified: bool,
}

fn pick_best(candidates: Vec<VariantCandidate>) -> Option<VariantCandidate> {
    candidates.into_iter().fold(None, |best, candidate| match best {
        None => Some(candidate),
        Some(current) => {
            let current_min = current.artist_sim.min(current.title_sim);
            let candidate_min = candidate.artist_sim.min(candidate.title_sim);
            let better = match candidate_min.partial_cmp(&current_min).unwrap() {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => {
                    let current_sum = current.artist_sim + current.title_sim;
                    let candidate_sum = candidate.artist_sim + candidate.title_sim;
                    match candidate_sum.partial_cmp(&current_sum).unwrap() {
                        std::cmp::Ordering::Greater => true,
                        std::cmp::Ordering::Less => false,
                        std::cmp::Ordering::Equal => match (candidate.is_verified, current.is_verified) {
                            (true, false) => true,
                            (false, true) => false,
                            _ => candidate.recording_id < current.recording_id,
                        },
                    }
                }
            };
            Some(if better { candidate } else { current })
        }
    })
}

/// Four-strategy batched resolver (§4.5). Pure over a snapshot of
/// C2/C4/C6: repeated calls on the same inputs and the same DB state
/// yield identical output.
pub async fn match_batch(
    pool: &SqlitePool,
    vector_index: &impl VectorIndex,
    thresholds: &ThresholdConfig,
    vector_topk: usize,
    queries: &[MatchQuery],
) -> Result<Vec<Match>> {
    let mut results: Vec<Option<Match>> = vec![None; queries.len()];

    // Resolve artist aliases and compute signatures up front.
    let mut resolved_artists = Vec::with_capacity(queries.len());
    let mut signatures = Vec::with_capacity(queries.len());
    for query in queries {
        let resolved = discovery::resolve_alias(pool, &query.raw_artist).await?.unwrap_or_else(|| query.raw_artist.clone());
        let sig = normalize::signature(&resolved, &query.raw_title);
        resolved_artists.push(resolved);
        signatures.push(sig);
    }

    // Strategy 1: identity bridge, one batched lookup.
    let bridge_hits = bridge::lookup_active_batch(pool, &signatures).await?;
    let bridge_by_sig: HashMap<&str, &bridge::BridgeEntry> =
        bridge_hits.iter().map(|b| (b.signature.as_str(), b)).collect();

    for (i, sig) in signatures.iter().enumerate() {
        if let Some(bridge) = bridge_by_sig.get(sig.as_str()) {
            results[i] = Some(Match {
                work_id: Some(bridge.work_id),
                recording_id: None,
                category: MatchCategory::AutoLink,
                reason: "identity_bridge".to_string(),
                scores: MatchScores { artist_sim: 1.0, title_sim: 1.0, vector_distance: None },
                signature: sig.clone(),
            });
        }
    }

    // Strategy 2: exact match.
    for (i, query) in queries.iter().enumerate() {
        if results[i].is_some() {
            continue;
        }
        let normalized_artist = normalize::clean_artist(&resolved_artists[i]);
        let normalized_title = normalized_query_title(&query.raw_title);
        if let Some((recording, work)) = library::find_recording_exact(pool, &normalized_artist, &normalized_title).await? {
            results[i] = Some(Match {
                work_id: Some(work.id),
                recording_id: Some(recording.id),
                category: MatchCategory::AutoLink,
                reason: "exact".to_string(),
                scores: MatchScores { artist_sim: 1.0, title_sim: 1.0, vector_distance: None },
                signature: signatures[i].clone(),
            });
        }
    }

    // Strategy 3: variant (fuzzy), artist lookup deduplicated per batch.
    let remaining: Vec<usize> = (0..queries.len()).filter(|&i| results[i].is_none()).collect();
    if !remaining.is_empty() {
        let all_artists = library::list_all_artists(pool).await?;
        let mut artist_sim_cache: HashMap<String, Vec<(i64, f64)>> = HashMap::new();
        let mut recordings_cache: HashMap<i64, Vec<(library::Recording, library::Work)>> = HashMap::new();

        for &i in &remaining {
            let normalized_artist = normalize::clean_artist(&resolved_artists[i]);
            let normalized_title = normalized_query_title(&queries[i].raw_title);

            let artist_sims = artist_sim_cache.entry(normalized_artist.clone()).or_insert_with(|| {
                all_artists
                    .iter()
                    .map(|a| (a.id, string_ratio(&normalized_artist, &a.name)))
                    .filter(|(_, sim)| *sim >= thresholds.artist_review || *sim == 1.0)
                    .collect()
            });

            let mut candidates = Vec::new();
            for &(artist_id, artist_sim) in artist_sims.iter() {
                let recordings = match recordings_cache.entry(artist_id) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(library::list_recordings_for_artist(pool, artist_id).await?)
                    }
                };
                for (recording, work) in recordings.iter() {
                    let title_sim = string_ratio(&normalized_title, &recording.title);
                    candidates.push(VariantCandidate {
                        work_id: work.id,
                        recording_id: recording.id,
                        artist_sim,
                        title_sim,
                        is_verified: recording.is_verified,
                    });
                }
            }

            let passing: Vec<VariantCandidate> = candidates
                .into_iter()
                .filter(|c| classify(c.artist_sim, c.title_sim, thresholds) != MatchCategory::Reject)
                .collect();

            if let Some(best) = pick_best(passing) {
                let category = classify(best.artist_sim, best.title_sim, thresholds);
                results[i] = Some(Match {
                    work_id: Some(best.work_id),
                    recording_id: Some(best.recording_id),
                    category,
                    reason: "variant".to_string(),
                    scores: MatchScores { artist_sim: best.artist_sim, title_sim: best.title_sim, vector_distance: None },
                    signature: signatures[i].clone(),
                });
            }
        }
    }

    // Strategy 4: vector fallback, unresolved queries only. Never auto-links.
    let unresolved: Vec<usize> = (0..queries.len()).filter(|&i| results[i].is_none()).collect();
    if !unresolved.is_empty() {
        let vector_texts: Vec<String> = unresolved
            .iter()
            .map(|&i| {
                let normalized_artist = normalize::clean_artist(&resolved_artists[i]);
                let normalized_title = normalized_query_title(&queries[i].raw_title);
                format!("{normalized_artist} - {normalized_title}")
            })
            .collect();

        let search_results = vector_index.search_batch(&vector_texts, vector_topk).await?;

        for (idx, &i) in unresolved.iter().enumerate() {
            let normalized_title = normalized_query_title(&queries[i].raw_title);
            for (recording_id, distance) in &search_results[idx] {
                let recording = match library::get_recording(pool, *recording_id).await {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                let title_sim = string_ratio(&normalized_title, &recording.title);
                if title_sim >= thresholds.title_review {
                    results[i] = Some(Match {
                        work_id: Some(recording.work_id),
                        recording_id: Some(recording.id),
                        category: MatchCategory::Review,
                        reason: "vector".to_string(),
                        scores: MatchScores { artist_sim: 0.0, title_sim, vector_distance: Some(*distance) },
                        signature: signatures[i].clone(),
                    });
                    break;
                }
            }
        }
    }

    // Strategy 5: no match.
    for (i, slot) in results.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(Match {
                work_id: None,
                recording_id: None,
                category: MatchCategory::Reject,
                reason: "No candidate".to_string(),
                scores: MatchScores::default(),
                signature: signatures[i].clone(),
            });
        }
    }

    Ok(results.into_iter().map(|m| m.unwrap()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::NullVectorIndex;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        library::schema::sync_all(&pool).await.unwrap();
        bridge::sync_schema(&pool).await.unwrap();
        discovery::sync_schema(&pool).await.unwrap();
        pool
    }

    #[test]
    fn classify_is_total_over_the_unit_square() {
        let thresholds = ThresholdConfig::default();
        for i in 0..=10 {
            for j in 0..=10 {
                let artist_sim = i as f64 / 10.0;
                let title_sim = j as f64 / 10.0;
                let category = classify(artist_sim, title_sim, &thresholds);
                assert!(matches!(category, MatchCategory::AutoLink | MatchCategory::Review | MatchCategory::Reject));
            }
        }
    }

    #[test]
    fn raising_artist_auto_only_demotes_auto_link_to_review() {
        let mut thresholds = ThresholdConfig::default();
        let before = classify(0.86, 0.95, &thresholds);
        thresholds.artist_auto = 0.95;
        let after = classify(0.86, 0.95, &thresholds);
        assert_eq!(before, MatchCategory::AutoLink);
        assert_eq!(after, MatchCategory::Review);
    }

    #[test]
    fn three_range_decision_literal_example() {
        let thresholds = ThresholdConfig {
            artist_auto: 0.85,
            artist_review: 0.70,
            title_auto: 0.80,
            title_review: 0.70,
        };
        assert_eq!(classify(0.87, 0.95, &thresholds), MatchCategory::AutoLink);
        assert_eq!(classify(0.72, 0.95, &thresholds), MatchCategory::Review);
        assert_eq!(classify(0.72, 0.65, &thresholds), MatchCategory::Reject);
    }

    #[tokio::test]
    async fn exact_match_auto_links() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "The Beatles").await.unwrap();
        let work = library::upsert_work(&pool, "hey jude", artist.id, 0.85, 500).await.unwrap();
        library::upsert_recording(&pool, work.id, "hey jude", "Original", None, None).await.unwrap();

        let thresholds = ThresholdConfig::default();
        let queries = vec![MatchQuery { raw_artist: "The Beatles".to_string(), raw_title: "Hey Jude".to_string() }];
        let results = match_batch(&pool, &NullVectorIndex, &thresholds, 5, &queries).await.unwrap();
        assert_eq!(results[0].category, MatchCategory::AutoLink);
        assert_eq!(results[0].work_id, Some(work.id));
        assert_eq!(results[0].reason, "exact");
    }

    #[tokio::test]
    async fn identity_bridge_wins_over_exact_and_reports_reason() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "Artist").await.unwrap();
        let work = library::upsert_work(&pool, "song", artist.id, 0.85, 500).await.unwrap();
        let other_work = library::upsert_work(&pool, "other song", artist.id, 0.85, 500).await.unwrap();
        library::upsert_recording(&pool, work.id, "song", "Original", None, None).await.unwrap();

        let sig = normalize::signature("Artist", "Song");
        bridge::link(&pool, &sig, "Artist", "Song", other_work.id, 1.0).await.unwrap();

        let thresholds = ThresholdConfig::default();
        let queries = vec![MatchQuery { raw_artist: "Artist".to_string(), raw_title: "Song".to_string() }];
        let results = match_batch(&pool, &NullVectorIndex, &thresholds, 5, &queries).await.unwrap();
        assert_eq!(results[0].work_id, Some(other_work.id));
        assert_eq!(results[0].reason, "identity_bridge");
    }

    #[test]
    fn variant_candidates_are_filtered_by_classify_before_the_min_tie_break() {
        let thresholds = ThresholdConfig { artist_auto: 0.99, artist_review: 0.70, title_auto: 0.99, title_review: 0.50 };
        // A has the higher pick_best() min (0.69) but fails classify() on the
        // artist dimension (0.69 < artist_review). B has a lower min (0.50)
        // but passes classify() on both dimensions. Tie-breaking on min()
        // before discarding Reject candidates would let A win and then
        // discard the whole match; filtering first must let B survive.
        let a = VariantCandidate { work_id: 1, recording_id: 1, artist_sim: 0.69, title_sim: 0.99, is_verified: false };
        let b = VariantCandidate { work_id: 2, recording_id: 2, artist_sim: 0.90, title_sim: 0.50, is_verified: false };

        let passing: Vec<VariantCandidate> =
            vec![a, b].into_iter().filter(|c| classify(c.artist_sim, c.title_sim, &thresholds) != MatchCategory::Reject).collect();
        let best = pick_best(passing).unwrap();

        assert_eq!(best.work_id, 2);
        assert_eq!(classify(best.artist_sim, best.title_sim, &thresholds), MatchCategory::Review);
    }

    #[tokio::test]
    async fn no_candidate_rejects() {
        let pool = test_pool().await;
        let thresholds = ThresholdConfig::default();
        let queries = vec![MatchQuery { raw_artist: "Nobody".to_string(), raw_title: "Nothing".to_string() }];
        let results = match_batch(&pool, &NullVectorIndex, &thresholds, 5, &queries).await.unwrap();
        assert_eq!(results[0].category, MatchCategory::Reject);
        assert_eq!(results[0].reason, "No candidate");
    }
}
