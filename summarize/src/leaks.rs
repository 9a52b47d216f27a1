use crate::job_info::ModuleInfo;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeakCandidate {
    pub name: String,
    pub type_name: String,
    /// Growth of retained memory in MiB per event.
    pub slope: f64,
    pub events: usize,
}

/// Least-squares slope of `ys` against `0, 1, 2, ...`.
fn slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in ys.iter().enumerate() {
        let dx = x as f64 - mean_x;
        covariance += dx * (y - mean_y);
        variance += dx * dx;
    }
    covariance / variance
}

/// Ranks modules by how fast the memory they retain, products excluded,
/// grows from event to event. Modules with fewer than two event samples
/// are left out. Largest slope first.
pub fn rank_by_retained_slope(modules: &[ModuleInfo], steps: &[String]) -> Vec<LeakCandidate> {
    let mut candidates: Vec<LeakCandidate> = modules
        .iter()
        .filter_map(|module| {
            let retained: Vec<f64> = steps
                .iter()
                .filter(|step| step.starts_with("event"))
                .filter_map(|step| module.steps.get(step))
                .map(|log| log.retained())
                .collect();
            if retained.len() <= 1 {
                return None;
            }

            Some(LeakCandidate {
                name: module.name.clone(),
                type_name: module.type_name.clone(),
                slope: slope(&retained),
                events: retained.len(),
            })
        })
        .collect();

    candidates.sort_by(|l, r| r.slope.partial_cmp(&l.slope).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_info::JobInfo;

    #[test]
    fn slope_of_a_straight_line() {
        assert_eq!(slope(&[1.0, 3.0, 5.0, 7.0]), 2.0);
        assert_eq!(slope(&[4.0, 4.0]), 0.0);
        assert_eq!(slope(&[3.0, 2.0, 1.0]), -1.0);
    }

    #[test]
    fn growing_modules_come_first() {
        let mut log = String::new();
        for event in 1..=4 {
            let mib = 1024 * 1024;
            log.push_str(&format!(
                " *MEMCOUNTER* event{},steady,Steady,{},0,0,0\n",
                event, mib
            ));
            log.push_str(&format!(
                " *MEMCOUNTER* event{},leaky,Leaky,{},0,0,0\n",
                event,
                event * mib
            ));
            log.push_str(&format!(
                " *MEMCOUNTER* event{},shrinking,Shrinking,{},0,0,0\n",
                event,
                (10 - event) * mib
            ));
        }
        log.push_str(" *MEMCOUNTER* beginJob,once,Once,1048576,0,0,0\n");
        log.push_str(" *MEMCOUNTER* event1,once,Once,1048576,0,0,0\n");
        let job = JobInfo::from_reader(log.as_bytes()).unwrap();

        let ranked = rank_by_retained_slope(&job.modules, &job.steps);

        let names: Vec<_> = ranked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["leaky", "steady", "shrinking"]);
        assert_eq!(ranked[0].slope, 1.0);
        assert_eq!(ranked[0].events, 4);
        assert_eq!(ranked[2].slope, -1.0);
    }

    #[test]
    fn products_do_not_count_as_leaks() {
        // Each event the module holds one more MiB, all of which the
        // framework frees before the next event.
        let log = "\
 *MEMCOUNTER* event1,producer,P,1048576,0,0,0
 *MEMCOUNTER* event2,producer,P,2097152,0,0,0,event1,1048576
 *MEMCOUNTER* event3,producer,P,3145728,0,0,0,event2,2097152
 *MEMCOUNTER* event4,producer,P,0,0,0,0,event3,3145728
";
        let job = JobInfo::from_reader(log.as_bytes()).unwrap();

        let ranked = rank_by_retained_slope(&job.modules, &job.steps);
        assert_eq!(ranked[0].slope, 0.0);
    }
}
