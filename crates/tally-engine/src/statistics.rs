use std::collections::BTreeMap;

use tally_db::models::{DemographicRow, OptionRow, PollRow};
use tally_types::api::{BucketCount, DemographicCount, OptionStatistics, Statistics};
use tally_types::models::PollStatus;

use crate::error::{PollError, Result};
use crate::service::PollService;

/// Bucket for members without a known age or gender.
pub const OTHER: &str = "기타";

/// Age buckets in output order.
pub const AGE_GROUPS: [&str; 9] = [
    "10대", "20대", "30대", "40대", "50대", "60대", "70대", "80대 이상", OTHER,
];

/// Gender buckets in output order.
pub const GENDERS: [&str; 3] = ["MALE", "FEMALE", OTHER];

pub fn age_group(age: Option<i64>) -> &'static str {
    match age {
        None => OTHER,
        Some(a) if a < 20 => "10대",
        Some(a) if a < 30 => "20대",
        Some(a) if a < 40 => "30대",
        Some(a) if a < 50 => "40대",
        Some(a) if a < 60 => "50대",
        Some(a) if a < 70 => "60대",
        Some(a) if a < 80 => "70대",
        Some(_) => "80대 이상",
    }
}

pub fn gender_label(gender: Option<&str>) -> &'static str {
    match gender {
        Some("MALE") => "MALE",
        Some("FEMALE") => "FEMALE",
        _ => OTHER,
    }
}

fn rank(order: &[&str], label: &str) -> usize {
    order.iter().position(|l| *l == label).unwrap_or(order.len())
}

/// Fold grouped vote rows into per-option breakdowns. Options keep their
/// input order; buckets follow `AGE_GROUPS` and `GENDERS`; empty buckets are
/// left out.
pub fn aggregate(options: &[OptionRow], rows: &[DemographicRow]) -> Vec<OptionStatistics> {
    options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            // (gender rank, age rank) -> count
            let mut cells: BTreeMap<(usize, usize), u64> = BTreeMap::new();
            for row in rows.iter().filter(|r| r.option_id == option.id) {
                let gender = rank(&GENDERS, gender_label(row.gender.as_deref()));
                let age = rank(&AGE_GROUPS, age_group(row.age));
                *cells.entry((gender, age)).or_default() += row.count;
            }

            let mut ages = [0u64; AGE_GROUPS.len()];
            let mut genders = [0u64; GENDERS.len()];
            for (&(g, a), &count) in &cells {
                genders[g] += count;
                ages[a] += count;
            }

            OptionStatistics {
                option_id: option.id,
                index: i + 1,
                content: option.content.clone(),
                vote_count: cells.values().sum(),
                age_groups: buckets(&AGE_GROUPS, &ages),
                genders: buckets(&GENDERS, &genders),
                demographics: cells
                    .iter()
                    .map(|(&(g, a), &count)| DemographicCount {
                        gender: GENDERS[g].to_string(),
                        age_group: AGE_GROUPS[a].to_string(),
                        count,
                    })
                    .collect(),
            }
        })
        .collect()
}

fn buckets(labels: &[&str], counts: &[u64]) -> Vec<BucketCount> {
    labels
        .iter()
        .zip(counts)
        .filter(|(_, count)| **count > 0)
        .map(|(label, count)| BucketCount {
            label: label.to_string(),
            count: *count,
        })
        .collect()
}

impl PollService {
    /// Breakdown of a closed poll's votes. Computed fresh on every call, so
    /// later changes to a voter's age or gender show up here.
    pub fn get_statistics(&self, poll_id: i64) -> Result<Statistics> {
        let poll = self.load_poll(poll_id)?;
        if poll.status != PollStatus::Closed {
            return Err(PollError::InvalidState(format!(
                "statistics for poll {} are available once it closes",
                poll_id
            )));
        }
        self.statistics_for(&poll)
    }

    pub(crate) fn statistics_for(&self, poll: &PollRow) -> Result<Statistics> {
        let options = self.db.get_options(poll.id)?;
        let rows = self.db.demographic_rows(poll.id)?;
        let options = aggregate(&options, &rows);
        let total_votes = options.iter().map(|o| o.vote_count).sum();

        Ok(Statistics {
            poll_id: poll.id,
            post_id: poll.post_id,
            options,
            total_votes,
        })
    }
}
