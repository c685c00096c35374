// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::{
    collections::{BinaryHeap, HashMap},
    mem,
    rc::Rc,
};

use crate::{EventType, Source};

pub(crate) const USEC_PER_SEC: u64 = 1_000_000;
pub(crate) const NSEC_PER_USEC: u64 = 1_000;
pub(crate) const USEC_INFINITY: u64 = u64::MAX;

/// usec readings of the supported clocks
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timestamp {
    realtime: u64,
    monotonic: u64,
}

impl Timestamp {
    pub(crate) fn new() -> Timestamp {
        Timestamp {
            realtime: 0,
            monotonic: 0,
        }
    }

    pub(crate) fn now(&mut self) -> Timestamp {
        unsafe {
            let mut tp = mem::MaybeUninit::zeroed().assume_init();
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut tp);
            self.realtime = load_usec(tp);
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut tp);
            self.monotonic = load_usec(tp);
        }
        *self
    }
}

fn load_usec(ts: libc::timespec) -> u64 {
    if ts.tv_sec < 0 || ts.tv_nsec < 0 {
        return USEC_INFINITY;
    }

    let sec = ts.tv_sec as u64;
    let usec = (ts.tv_nsec as u64) / NSEC_PER_USEC;
    if sec > (USEC_INFINITY - usec) / USEC_PER_SEC {
        return USEC_INFINITY;
    }

    sec * USEC_PER_SEC + usec
}

/// Pending timer sources, one deadline heap per clock.
#[derive(Debug)]
pub(crate) struct Timer {
    heaps: HashMap<EventType, BinaryHeap<ClockData>>,
    timestamp: Timestamp,
}

impl Timer {
    pub(crate) fn new() -> Timer {
        Timer {
            heaps: HashMap::new(),
            timestamp: Timestamp::new(),
        }
    }

    pub(crate) fn clockid(&self, et: &EventType) -> libc::clockid_t {
        match et {
            EventType::TimerRealtime => libc::CLOCK_REALTIME,
            EventType::TimerMonotonic => libc::CLOCK_MONOTONIC,
            _ => unreachable!("not a timer event type."),
        }
    }

    /// current reading of the clock backing `et`
    pub(crate) fn clock_now(&mut self, et: &EventType) -> u64 {
        self.timestamp.now();
        match et {
            EventType::TimerRealtime => self.timestamp.realtime,
            EventType::TimerMonotonic => self.timestamp.monotonic,
            _ => unreachable!("not a timer event type."),
        }
    }

    /// earliest pending deadline for `et`, if any
    pub(crate) fn next(&self, et: &EventType) -> Option<u64> {
        self.heaps.get(et).and_then(|h| h.peek()).map(|cd| cd.next)
    }

    pub(crate) fn push(&mut self, source: Rc<dyn Source>) {
        let et = source.event_type();
        let now = self.clock_now(&et);
        let rel = source.time_relative();
        let next = if rel > USEC_INFINITY - now {
            USEC_INFINITY
        } else {
            now + rel
        };

        self.heaps
            .entry(et)
            .or_insert_with(BinaryHeap::new)
            .push(ClockData { source, next });
    }

    /// pop the earliest source whose deadline has been reached
    pub(crate) fn pop(&mut self, et: &EventType) -> Option<Rc<dyn Source>> {
        let now = self.clock_now(et);
        let heap = self.heaps.get_mut(et)?;
        match heap.peek() {
            Some(cd) if cd.next <= now => heap.pop().map(|cd| cd.source),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, et: &EventType, source: Rc<dyn Source>) {
        if let Some(heap) = self.heaps.get_mut(et) {
            let kept = heap
                .drain()
                .filter(|cd| cd.source.token() != source.token())
                .collect::<Vec<_>>();
            heap.extend(kept);
        }
    }

    pub(crate) fn is_empty(&self, et: &EventType) -> bool {
        self.heaps.get(et).map(|h| h.is_empty()).unwrap_or(true)
    }

    pub(crate) fn timer_stored(&self, next: u64) -> libc::itimerspec {
        libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: (next / USEC_PER_SEC) as i64,
                tv_nsec: ((next % USEC_PER_SEC) * NSEC_PER_USEC) as i64,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ClockData {
    source: Rc<dyn Source>,
    next: u64,
}

// earliest deadline pops first
impl Ord for ClockData {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next.cmp(&other.next).reverse()
    }
}

impl PartialOrd for ClockData {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ClockData {
    fn eq(&self, other: &Self) -> bool {
        self.next == other.next
    }
}

impl Eq for ClockData {}

#[cfg(test)]
mod test {
    use super::Timestamp;

    #[test]
    fn timestamp_monotonic_moves() {
        let mut ts = Timestamp::new();
        let a = ts.now().monotonic;
        let b = ts.now().monotonic;
        assert!(b >= a);
    }
}
