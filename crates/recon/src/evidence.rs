use crate::model::{MatchResult, MatchStatus, MatchSummary};

/// Count match results per status.
pub fn compute_summary(results: &[MatchResult]) -> MatchSummary {
    let mut summary = MatchSummary {
        total: results.len(),
        ..MatchSummary::default()
    };

    for r in results {
        match r.match_status {
            MatchStatus::Ok => summary.ok += 1,
            MatchStatus::QtyWarning => summary.qty_warning += 1,
            MatchStatus::NoMapping => summary.no_mapping += 1,
            MatchStatus::NoMatch => summary.no_match += 1,
        }
    }

    summary
}
