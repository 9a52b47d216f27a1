use crate::job_info::{JobInfo, MemoryLog, ModuleInfo};
use rustc_hash::FxHashMap;

/// Adds up the memory of all modules of the same type, giving one entry per
/// type named after it. Held memory, product size and held allocations are
/// summed. The peaks of different modules never coincide, so for those only
/// the largest is kept.
pub fn aggregate_by_type(job: &JobInfo) -> JobInfo {
    let mut classes: Vec<ModuleInfo> = Vec::new();
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();

    for module in job.modules.iter().filter(|m| !m.is_event_total()) {
        let class_index = *index.entry(&module.type_name).or_insert_with(|| {
            classes.push(ModuleInfo::new(&module.type_name, &module.type_name));
            classes.len() - 1
        });
        let class = &mut classes[class_index];

        for (step, log) in &module.steps {
            let total = class
                .steps
                .entry(step.clone())
                .or_insert_with(MemoryLog::default);
            total.held_memory += log.held_memory;
            total.product_size += log.product_size;
            total.held_allocations += log.held_allocations;
            if log.peak_memory > total.peak_memory {
                total.peak_memory = log.peak_memory;
                total.peak_allocations = log.peak_allocations;
            }
        }
    }

    JobInfo::from_modules(classes, job.steps.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
 *MEMCOUNTER* event1,ak4,JetProducer,1048576,3145728,1,3
 *MEMCOUNTER* event1,ak8,JetProducer,2097152,2097152,2,2
 *MEMCOUNTER* event1,tracks,TrackProducer,1048576,1048576,1,1
 *MEMCOUNTER* event2,ak4,JetProducer,0,0,0,0,event1,1048576
 *MODULETIMER* event1,EVENT,EVENT,1,1,1
";

    #[test]
    fn modules_of_one_type_are_summed() {
        let job = JobInfo::from_reader(LOG.as_bytes()).unwrap();
        let classes = aggregate_by_type(&job);

        let names: Vec<_> = classes.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["JetProducer", "TrackProducer"]);

        let jets = &classes.module("JetProducer").unwrap().steps["event1"];
        assert_eq!(jets.held_memory, 3.0);
        assert_eq!(jets.peak_memory, 3.0);
        assert_eq!(jets.peak_allocations, 3);
        assert_eq!(jets.held_allocations, 3);
        assert_eq!(jets.product_size, 1.0);

        assert_eq!(classes.steps, job.steps);
        assert!(classes.contains_memory);
        assert!(!classes.contains_time);
    }
}
