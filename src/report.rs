//! Grade distribution and ranking over the full record set.
//!
//! Two bucket schemes coexist: per-course thresholds (60/70/85) for the
//! statistics view and total-score thresholds (60 per course, 150/170 total)
//! for the ranking snapshot. They answer different questions and are kept apart.

use serde::Serialize;

use crate::store::StudentRecord;

pub const PASS_LINE: f64 = 60.0;
pub const GOOD_LINE: f64 = 70.0;
pub const EXCELLENT_LINE: f64 = 85.0;
pub const TOTAL_GOOD_LINE: f64 = 150.0;
pub const TOTAL_EXCELLENT_LINE: f64 = 170.0;
pub const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeBucket {
    Fail,
    Pass,
    Good,
    Excellent,
}

impl GradeBucket {
    pub const ALL: [GradeBucket; 4] = [
        GradeBucket::Fail,
        GradeBucket::Pass,
        GradeBucket::Good,
        GradeBucket::Excellent,
    ];

    pub fn for_course_score(score: f64) -> Self {
        if score < PASS_LINE {
            GradeBucket::Fail
        } else if score < GOOD_LINE {
            GradeBucket::Pass
        } else if score < EXCELLENT_LINE {
            GradeBucket::Good
        } else {
            GradeBucket::Excellent
        }
    }

    pub fn range_label(self) -> &'static str {
        match self {
            GradeBucket::Fail => "0-59",
            GradeBucket::Pass => "60-69",
            GradeBucket::Good => "70-84",
            GradeBucket::Excellent => "85-100",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Course {
    A,
    B,
}

impl Course {
    pub fn score(self, r: &StudentRecord) -> f64 {
        match self {
            Course::A => r.score_a,
            Course::B => r.score_b,
        }
    }
}

/// Percentage of `count` in `population`; an empty population yields 0.
pub fn ratio(count: usize, population: usize) -> f64 {
    if population == 0 {
        0.0
    } else {
        count as f64 / population as f64 * 100.0
    }
}

fn mean(values: impl Iterator<Item = f64>, population: usize) -> f64 {
    if population == 0 {
        0.0
    } else {
        values.sum::<f64>() / population as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMember {
    pub student_number: String,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    pub bucket: GradeBucket,
    pub range: &'static str,
    pub members: Vec<BucketMember>,
    pub count: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub buckets: Vec<BucketStats>,
    pub average: f64,
}

impl CourseStats {
    pub fn bucket(&self, bucket: GradeBucket) -> &BucketStats {
        // `buckets` always holds every grade in `GradeBucket::ALL` order.
        &self.buckets[bucket as usize]
    }
}

pub fn course_stats(records: &[StudentRecord], course: Course) -> CourseStats {
    let population = records.len();
    let buckets = GradeBucket::ALL
        .iter()
        .map(|&bucket| {
            let members: Vec<BucketMember> = records
                .iter()
                .filter(|r| GradeBucket::for_course_score(course.score(r)) == bucket)
                .map(|r| BucketMember {
                    student_number: r.student_number.clone(),
                    name: r.name.clone(),
                    score: course.score(r),
                })
                .collect();
            let count = members.len();
            BucketStats {
                bucket,
                range: bucket.range_label(),
                members,
                count,
                ratio: ratio(count, population),
            }
        })
        .collect();
    CourseStats {
        buckets,
        average: mean(records.iter().map(|r| course.score(r)), population),
    }
}

/// Total-score view: `pass` is the complement of `fail`, while `good` and
/// `excellent` are counted independently from the total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalBuckets {
    pub population: usize,
    pub fail_count: usize,
    pub pass_count: usize,
    pub good_count: usize,
    pub excellent_count: usize,
    pub fail_ratio: f64,
    pub pass_ratio: f64,
    pub good_ratio: f64,
    pub excellent_ratio: f64,
}

pub fn total_buckets(records: &[StudentRecord]) -> TotalBuckets {
    let population = records.len();
    let fail_count = records
        .iter()
        .filter(|r| r.score_a < PASS_LINE || r.score_b < PASS_LINE)
        .count();
    let pass_count = population - fail_count;
    let good_count = records
        .iter()
        .filter(|r| (TOTAL_GOOD_LINE..TOTAL_EXCELLENT_LINE).contains(&r.total()))
        .count();
    let excellent_count = records
        .iter()
        .filter(|r| r.total() >= TOTAL_EXCELLENT_LINE)
        .count();
    TotalBuckets {
        population,
        fail_count,
        pass_count,
        good_count,
        excellent_count,
        fail_ratio: ratio(fail_count, population),
        pass_ratio: ratio(pass_count, population),
        good_ratio: ratio(good_count, population),
        excellent_ratio: ratio(excellent_count, population),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedStudent {
    pub rank: usize,
    pub record: StudentRecord,
}

/// Descending by total. The sort is stable, so ties keep the order the records
/// came in (the store's insertion order).
pub fn ranking(records: &[StudentRecord]) -> Vec<RankedStudent> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| b.total().total_cmp(&a.total()));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, record)| RankedStudent {
            rank: i + 1,
            record,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub student_count: usize,
    pub average_total: f64,
    /// Both course scores at or above the pass line.
    pub pass_count: usize,
    pub recent: Vec<StudentRecord>,
}

pub fn dashboard(records: &[StudentRecord], recent: Vec<StudentRecord>) -> Dashboard {
    Dashboard {
        student_count: records.len(),
        average_total: mean(records.iter().map(StudentRecord::total), records.len()),
        pass_count: records
            .iter()
            .filter(|r| r.score_a >= PASS_LINE && r.score_b >= PASS_LINE)
            .count(),
        recent,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub population: usize,
    pub average_total: f64,
    pub course_a: CourseStats,
    pub course_b: CourseStats,
    pub distribution_labels: [&'static str; 4],
}

/// `None` for an empty store, which the statistics view shows as "no data".
pub fn stats(records: &[StudentRecord]) -> Option<StatsReport> {
    if records.is_empty() {
        return None;
    }
    Some(StatsReport {
        population: records.len(),
        average_total: mean(records.iter().map(StudentRecord::total), records.len()),
        course_a: course_stats(records, Course::A),
        course_b: course_stats(records, Course::B),
        distribution_labels: GradeBucket::ALL.map(GradeBucket::range_label),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(sno: &str, a: f64, b: f64) -> StudentRecord {
        StudentRecord::new(sno, sno, a, b)
    }

    #[test]
    fn course_thresholds_are_half_open() {
        assert_eq!(GradeBucket::for_course_score(59.9), GradeBucket::Fail);
        assert_eq!(GradeBucket::for_course_score(60.0), GradeBucket::Pass);
        assert_eq!(GradeBucket::for_course_score(70.0), GradeBucket::Good);
        assert_eq!(GradeBucket::for_course_score(84.99), GradeBucket::Good);
        assert_eq!(GradeBucket::for_course_score(85.0), GradeBucket::Excellent);
    }

    #[test]
    fn course_ratios_sum_to_one_hundred() {
        let records = vec![rec("a", 10.0, 0.0), rec("b", 65.0, 0.0), rec("c", 75.0, 0.0)];
        let stats = course_stats(&records, Course::A);
        let sum: f64 = stats.buckets.iter().map(|b| b.ratio).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert_eq!(stats.bucket(GradeBucket::Excellent).count, 0);
        assert_eq!(stats.bucket(GradeBucket::Pass).members[0].student_number, "b");
        assert!((stats.average - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_population_has_zero_ratios() {
        let stats = course_stats(&[], Course::B);
        assert!(stats.buckets.iter().all(|b| b.ratio == 0.0 && b.count == 0));
        assert_eq!(stats.average, 0.0);
        let totals = total_buckets(&[]);
        assert_eq!(totals.pass_ratio, 0.0);
        assert_eq!(totals.excellent_ratio, 0.0);
    }

    #[test]
    fn total_scheme_counts_fail_by_either_course() {
        let records = vec![
            rec("a", 59.0, 100.0), // fail though total 159
            rec("b", 80.0, 75.0),  // good
            rec("c", 90.0, 85.0),  // excellent
            rec("d", 60.0, 60.0),  // pass only
        ];
        let t = total_buckets(&records);
        assert_eq!(t.fail_count, 1);
        assert_eq!(t.pass_count, 3);
        assert_eq!(t.good_count, 2);
        assert_eq!(t.excellent_count, 1);
        assert!((t.fail_ratio - 25.0).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let records = vec![rec("S1", 50.0, 50.0), rec("S2", 90.0, 10.0), rec("S3", 70.0, 70.0)];
        let ranked = ranking(&records);
        let order: Vec<_> = ranked.iter().map(|r| r.record.student_number.as_str()).collect();
        assert_eq!(order, vec!["S3", "S1", "S2"]);
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn stats_is_none_for_empty_store() {
        assert!(stats(&[]).is_none());
        let report = stats(&[rec("a", 60.0, 90.0)]).expect("stats");
        assert_eq!(report.distribution_labels, ["0-59", "60-69", "70-84", "85-100"]);
        assert_eq!(report.course_b.bucket(GradeBucket::Excellent).count, 1);
    }
}
