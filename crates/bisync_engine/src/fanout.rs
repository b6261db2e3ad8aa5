//! Bounded parallel execution of independent requests.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Runs `f` over every item with at most `limit` threads and returns the
/// results in item order.
///
/// Runs inline when there is a single item or the limit is one. A panic in
/// `f` is propagated to the caller.
pub(crate) fn fan_out<I, T, F>(limit: usize, items: &[I], f: F) -> Vec<T>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> T + Sync,
{
    let workers = limit.min(items.len());
    if workers <= 1 {
        return items.iter().map(f).collect();
    }

    let next = AtomicUsize::new(0);
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(items.len()).collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some(item) = items.get(idx) else { break };
                        done.push((idx, f(item)));
                    }
                    done
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(done) => {
                    for (idx, result) in done {
                        slots[idx] = Some(result);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn preserves_order() {
        let items: Vec<u64> = (0..50).collect();
        let out = fan_out(8, &items, |n| {
            std::thread::sleep(Duration::from_millis(50 - n));
            n * 2
        });
        assert_eq!(out, items.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn respects_limit() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..20).collect();
        fan_out(3, &items, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn empty_and_single() {
        let none: Vec<u8> = Vec::new();
        assert!(fan_out(4, &none, |b| *b).is_empty());
        assert_eq!(fan_out(4, &[7u8], |b| *b + 1), vec![8]);
    }
}
