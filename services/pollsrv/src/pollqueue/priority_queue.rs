//! Priority poll queue
//!
//! A binary min-heap over polling points, ordered by priority-class rank
//! and then by queue entry time (earliest first). All operations take the
//! queue lock for their duration.

use parking_lot::Mutex;
use poll_model::PollPriority;
use uuid::Uuid;

use super::polling_point::PollingPoint;

/// Thread-safe min-heap of polling points.
#[derive(Debug, Default)]
pub struct PriorityPollQueue {
    heap: Mutex<Vec<PollingPoint>>,
}

/// Heap ordering: lower rank first, then earlier entry time.
fn less(a: &PollingPoint, b: &PollingPoint) -> bool {
    let a_rank = a.priority.rank();
    let b_rank = b.priority.rank();
    if a_rank != b_rank {
        return a_rank < b_rank;
    }
    a.queue_entry_time < b.queue_entry_time
}

fn sift_up(heap: &mut [PollingPoint], mut index: usize) {
    while index > 0 {
        let parent = (index - 1) / 2;
        if !less(&heap[index], &heap[parent]) {
            break;
        }
        heap.swap(index, parent);
        index = parent;
    }
}

fn sift_down(heap: &mut [PollingPoint], mut index: usize) {
    loop {
        let left = 2 * index + 1;
        if left >= heap.len() {
            break;
        }
        let right = left + 1;
        let mut smallest = left;
        if right < heap.len() && less(&heap[right], &heap[left]) {
            smallest = right;
        }
        if !less(&heap[smallest], &heap[index]) {
            break;
        }
        heap.swap(index, smallest);
        index = smallest;
    }
}

/// Restore the heap invariant around `index` after its key changed.
fn fix(heap: &mut [PollingPoint], index: usize) {
    sift_down(heap, index);
    sift_up(heap, index);
}

fn remove_at(heap: &mut Vec<PollingPoint>, index: usize) -> PollingPoint {
    let last = heap.len() - 1;
    heap.swap(index, last);
    let mut pp = heap.pop().expect("heap checked non-empty");
    if index < heap.len() {
        fix(heap, index);
    }
    pp.reset_timers();
    pp
}

impl PriorityPollQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a polling point; refused when one already exists for the same
    /// point uuid.
    pub fn add(&self, pp: PollingPoint) -> bool {
        let mut heap = self.heap.lock();
        if heap.iter().any(|existing| existing.point_uuid == pp.point_uuid) {
            return false;
        }
        heap.push(pp);
        let last = heap.len() - 1;
        sift_up(&mut heap, last);
        true
    }

    /// Pop the highest-priority polling point.
    pub fn pop_next(&self) -> Option<PollingPoint> {
        let mut heap = self.heap.lock();
        if heap.is_empty() {
            return None;
        }
        let last = heap.len() - 1;
        heap.swap(0, last);
        let pp = heap.pop();
        if !heap.is_empty() {
            sift_down(&mut heap, 0);
        }
        pp
    }

    pub fn contains(&self, point_uuid: Uuid) -> bool {
        self.get_by_point(point_uuid).is_some()
    }

    /// Scheduling identity of a queued point, if present.
    pub fn get_by_point(&self, point_uuid: Uuid) -> Option<super::polling_point::PollToken> {
        self.heap
            .lock()
            .iter()
            .find(|pp| pp.point_uuid == point_uuid)
            .map(|pp| pp.token())
    }

    pub fn remove_by_point(&self, point_uuid: Uuid) -> Option<PollingPoint> {
        let mut heap = self.heap.lock();
        let index = heap.iter().position(|pp| pp.point_uuid == point_uuid)?;
        Some(remove_at(&mut heap, index))
    }

    pub fn remove_by_device(&self, device_uuid: Uuid) {
        let mut heap = self.heap.lock();
        while let Some(index) = heap.iter().position(|pp| pp.device_uuid == device_uuid) {
            remove_at(&mut heap, index);
        }
    }

    pub fn remove_by_network(&self, network_uuid: Uuid) {
        let mut heap = self.heap.lock();
        while let Some(index) = heap.iter().position(|pp| pp.network_uuid == network_uuid) {
            remove_at(&mut heap, index);
        }
    }

    /// Change a queued point's priority and fix the heap in place.
    pub fn update_priority(&self, point_uuid: Uuid, priority: PollPriority) -> bool {
        let mut heap = self.heap.lock();
        if let Some(index) = heap.iter().position(|pp| pp.point_uuid == point_uuid) {
            heap[index].priority = priority;
            fix(&mut heap, index);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Drain the queue, cancelling all timers.
    pub fn empty_queue(&self) {
        let mut heap = self.heap.lock();
        for pp in heap.iter_mut() {
            pp.reset_timers();
        }
        heap.clear();
    }

    /// Queue length per priority class, in rank order.
    pub fn priority_counts(&self) -> [i64; 4] {
        let heap = self.heap.lock();
        let mut counts = [0i64; 4];
        for pp in heap.iter() {
            counts[pp.priority.rank() as usize] += 1;
        }
        counts
    }

    pub fn active_timer_count(&self) -> usize {
        self.heap
            .lock()
            .iter()
            .map(|pp| pp.active_timer_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pp(priority: PollPriority, entry_time: i64) -> PollingPoint {
        let mut pp = PollingPoint::with_priority(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            priority,
        );
        pp.queue_entry_time = entry_time;
        pp
    }

    #[test]
    fn pops_by_priority_then_entry_time() {
        let queue = PriorityPollQueue::new();
        queue.add(pp(PollPriority::Low, 1));
        queue.add(pp(PollPriority::Normal, 5));
        queue.add(pp(PollPriority::Normal, 2));
        queue.add(pp(PollPriority::Asap, 9));
        queue.add(pp(PollPriority::High, 3));

        let order: Vec<(u8, i64)> = std::iter::from_fn(|| queue.pop_next())
            .map(|pp| (pp.priority.rank(), pp.queue_entry_time))
            .collect();
        assert_eq!(order, vec![(0, 9), (1, 3), (2, 2), (2, 5), (3, 1)]);
    }

    #[test]
    fn add_is_idempotent_by_point_uuid() {
        let queue = PriorityPollQueue::new();
        let point_uuid = Uuid::new_v4();
        let device_uuid = Uuid::new_v4();
        let network_uuid = Uuid::new_v4();
        assert!(queue.add(PollingPoint::new(point_uuid, device_uuid, network_uuid)));
        assert!(!queue.add(PollingPoint::new(point_uuid, device_uuid, network_uuid)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_by_device_removes_all_matching() {
        let queue = PriorityPollQueue::new();
        let device_uuid = Uuid::new_v4();
        let network_uuid = Uuid::new_v4();
        for _ in 0..3 {
            queue.add(PollingPoint::new(Uuid::new_v4(), device_uuid, network_uuid));
        }
        queue.add(PollingPoint::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            network_uuid,
        ));

        queue.remove_by_device(device_uuid);
        assert_eq!(queue.len(), 1);

        queue.remove_by_network(network_uuid);
        assert!(queue.is_empty());
    }

    #[test]
    fn update_priority_reorders_heap() {
        let queue = PriorityPollQueue::new();
        let promoted = pp(PollPriority::Low, 10);
        let promoted_uuid = promoted.point_uuid;
        queue.add(promoted);
        queue.add(pp(PollPriority::Normal, 1));

        assert!(queue.update_priority(promoted_uuid, PollPriority::Asap));
        let first = queue.pop_next().unwrap();
        assert_eq!(first.point_uuid, promoted_uuid);
    }

    #[test]
    fn heap_property_survives_interleaved_ops() {
        let queue = PriorityPollQueue::new();
        let priorities = [
            PollPriority::Low,
            PollPriority::Asap,
            PollPriority::Normal,
            PollPriority::High,
        ];
        for i in 0..32i64 {
            queue.add(pp(priorities[(i % 4) as usize], 100 - i));
        }
        for _ in 0..8 {
            queue.pop_next();
        }
        let mut previous: Option<(u8, i64)> = None;
        while let Some(pp) = queue.pop_next() {
            let key = (pp.priority.rank(), pp.queue_entry_time);
            if let Some(prev) = previous {
                assert!(prev <= key, "heap order violated: {prev:?} then {key:?}");
            }
            previous = Some(key);
        }
    }
}
