use std::collections::HashSet;

use crate::model::Job;

const HIGH_RATE_MARKERS: &[&str] = &["$50", "$60", "$70"];
const MID_RATE_MARKERS: &[&str] = &["$30", "$40"];
const HIGH_RATE_BOOST: f64 = 0.10;
const MID_RATE_BOOST: f64 = 0.05;

/// Relevance of a job for a profile, in `[0, 1]`.
///
/// The base is the share of profile skills the job asks for. Duplicates in
/// `profile_skills` count on both sides of that ratio. A coarse budget boost
/// is added and the sum capped at 1.
pub fn score(job: &Job, profile_skills: &[String]) -> f64 {
    if job.skills.is_empty() || profile_skills.is_empty() {
        return 0.0;
    }

    let wanted: HashSet<String> = job.skills.iter().map(|s| s.to_lowercase()).collect();
    let matches = profile_skills
        .iter()
        .filter(|s| wanted.contains(&s.to_lowercase()))
        .count();
    let base = matches as f64 / profile_skills.len() as f64;

    (base + budget_boost(&job.budget)).min(1.0)
}

/// Substring heuristic over the budget text; the higher tier wins.
pub fn budget_boost(budget: &str) -> f64 {
    if HIGH_RATE_MARKERS.iter().any(|m| budget.contains(m)) {
        HIGH_RATE_BOOST
    } else if MID_RATE_MARKERS.iter().any(|m| budget.contains(m)) {
        MID_RATE_BOOST
    } else {
        0.0
    }
}

/// Score a job in place and snapshot the threshold comparison.
pub fn apply(job: &mut Job, profile_skills: &[String], threshold: f64) {
    job.score = score(job, profile_skills);
    job.above_threshold = job.score >= threshold;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(skills: &[&str], budget: &str) -> Job {
        Job::sample("~01", skills, budget)
    }

    fn skills(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn half_match_with_high_boost() {
        let j = job(&["Python", "API"], "$30.00 - $60.00");
        let s = score(&j, &skills(&["python", "docker"]));
        assert!((s - 0.6).abs() < 1e-9);
    }

    #[test]
    fn no_job_skills_scores_zero() {
        let j = job(&[], "$70/hr");
        assert_eq!(score(&j, &skills(&["python"])), 0.0);
        assert_eq!(score(&job(&["python"], "$70"), &[]), 0.0);
    }

    #[test]
    fn boost_tiers() {
        assert_eq!(budget_boost("Hourly: $50.00"), 0.10);
        assert_eq!(budget_boost("$40 fixed"), 0.05);
        assert_eq!(budget_boost("$15.00 - $25.00"), 0.0);
        assert_eq!(budget_boost(""), 0.0);
    }

    #[test]
    fn capped_at_one() {
        let j = job(&["n8n"], "$60");
        assert_eq!(score(&j, &skills(&["N8N"])), 1.0);
    }

    #[test]
    fn profile_duplicates_count() {
        let j = job(&["python"], "");
        let s = score(&j, &skills(&["python", "python", "docker", "react"]));
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn adding_matching_skill_never_lowers_base() {
        let j = job(&["python", "docker", "api"], "");
        let mut profile = skills(&["python", "react"]);
        let before = score(&j, &profile);
        profile.push("docker".into());
        assert!(score(&j, &profile) >= before);
    }

    #[test]
    fn deterministic_and_bounded() {
        let j = job(&["Python", "API", "Docker"], "$30 - $70");
        let p = skills(&["python", "api", "docker"]);
        let first = score(&j, &p);
        for _ in 0..5 {
            assert_eq!(score(&j, &p), first);
        }
        assert!((0.0..=1.0).contains(&first));
    }

    #[test]
    fn apply_sets_threshold_flag() {
        let mut j = job(&["Python", "API"], "$30.00 - $60.00");
        apply(&mut j, &skills(&["python", "docker"]), 0.6);
        assert!(j.above_threshold);
        apply(&mut j, &skills(&["python", "docker"]), 0.61);
        assert!(!j.above_threshold);
    }
}
