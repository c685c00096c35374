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

//! The event loop over timer expirations and file-descriptor readiness
use crate::error::*;
use crate::syscall;
use crate::timer::Timer;
use crate::{EventState, EventType, Poll, Source};
use nix::sys::signalfd::siginfo;
use nix::sys::signalfd::SfdFlags;
use nix::sys::signalfd::SigSet;
use nix::sys::signalfd::SignalFd;
use nix::unistd;
use snafu::ResultExt;
use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap};
use std::mem::MaybeUninit;
use std::os::unix::prelude::{AsRawFd, RawFd};
use std::rc::Rc;

const TIMER_TYPES: [EventType; 2] = [EventType::TimerMonotonic, EventType::TimerRealtime];

// tokens under which the shared timerfds are registered with epoll; source
// tokens are addresses, so small integers cannot collide with them
fn timerfd_token(et: &EventType) -> u64 {
    match et {
        EventType::TimerMonotonic => 1,
        EventType::TimerRealtime => 2,
        _ => unreachable!("not a timer event type."),
    }
}

/// An event scheduling framework based on epoll.
///
/// One source is dispatched per `run`; callbacks run sequentially on the
/// loop thread and may register or remove sources.
#[derive(Debug)]
pub struct Events {
    data: RefCell<EventsData>,
}

impl Drop for Events {
    fn drop(&mut self) {
        // repeating protection
        self.clear();
    }
}

impl Events {
    /// create the event loop
    pub fn new() -> Result<Events> {
        Ok(Events {
            data: RefCell::new(EventsData::new()?),
        })
    }

    /// for all: add a source, initially disabled
    pub fn add_source(&self, source: Rc<dyn Source>) -> Result<i32> {
        self.data.borrow_mut().add_source(source)
    }

    /// for all: check whether the source is registered
    pub fn has_source(&self, source: Rc<dyn Source>) -> bool {
        self.data.borrow().has_source(source)
    }

    /// for all: delete a source
    pub fn del_source(&self, source: Rc<dyn Source>) -> Result<i32> {
        self.data.borrow_mut().del_source(source)
    }

    /// for all: set the enable state of a source
    pub fn set_enabled(&self, source: Rc<dyn Source>, state: EventState) -> Result<i32> {
        self.data.borrow_mut().set_enabled(source, state)
    }

    /// for all: leave the loop after the current iteration
    pub fn set_exit(&self) {
        self.data.borrow_mut().set_exit()
    }

    /// for all: one iteration, dispatching at most one source.
    /// `timeout` is in milliseconds, -1 blocks until an event arrives.
    pub fn run(&self, timeout: i32) -> Result<i32> {
        if self.data.borrow().exit() {
            return Ok(0);
        }

        if !self.data.borrow_mut().prepare() {
            self.data.borrow_mut().wait(timeout);
        }

        self.dispatch()?;
        Ok(0)
    }

    /// for all: iterate until `set_exit` is called
    pub fn rloop(&self) -> Result<i32> {
        loop {
            if self.data.borrow().exit() {
                return Ok(0);
            }
            self.run(-1i32)?;
        }
    }

    /// for signal: read one pending signal after a Signal source fired
    pub fn read_signals(&self) -> Option<siginfo> {
        self.data.borrow_mut().read_signals()
    }

    /// release every source; the loop is unusable afterwards
    pub fn clear(&self) {
        self.data.borrow_mut().clear();
    }

    // take the highest priority source off the pending queue and run it
    fn dispatch(&self) -> Result<i32> {
        if self.data.borrow().exit() {
            return Ok(0);
        }

        let first = self.data.borrow_mut().pending_pop();
        let top = match first {
            None => return Ok(0),
            Some(v) => v,
        };

        let state = match self.data.borrow().source_state(top.token()) {
            None => return Ok(0), // removed while pending
            Some(v) => v.state,
        };

        /* a non-post source raising marks all post sources pending */
        if state != EventState::Off && top.event_type() != EventType::Post {
            self.data.borrow_mut().pending_posts();
        }

        match state {
            EventState::Off => {}
            EventState::On => {
                top.dispatch(self);
                self.data.borrow_mut().rearm(&top);
            }
            EventState::OneShot => {
                self.data
                    .borrow_mut()
                    .set_enabled(top.clone(), EventState::Off)?;

                top.dispatch(self);
            }
        }
        Ok(0)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct State {
    state: EventState,
    in_pending: bool,
}

impl Default for State {
    fn default() -> State {
        State {
            state: EventState::Off,
            in_pending: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EventsData {
    poller: Poll,
    exit: bool,
    sources: HashMap<u64, Rc<dyn Source>>, // io + signal, keyed by token
    defer_sources: HashMap<u64, Rc<dyn Source>>,
    post_sources: HashMap<u64, Rc<dyn Source>>,
    pending: BinaryHeap<Rc<dyn Source>>,
    state: HashMap<u64, State>,
    timerfd: HashMap<EventType, RawFd>,
    signalfd: SignalFd,
    timer: Timer,
}

// the declaration "pub(self)" is for identification only.
impl EventsData {
    pub(self) fn new() -> Result<EventsData> {
        Ok(Self {
            poller: Poll::new()?,
            exit: false,
            sources: HashMap::new(),
            defer_sources: HashMap::new(),
            post_sources: HashMap::new(),
            pending: BinaryHeap::new(),
            state: HashMap::new(),
            timerfd: HashMap::new(),
            signalfd: SignalFd::with_flags(
                &SigSet::empty(),
                SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC,
            )
            .context(NixSnafu)?,
            timer: Timer::new(),
        })
    }

    pub(self) fn add_source(&mut self, source: Rc<dyn Source>) -> Result<i32> {
        let token = source.token();

        match source.event_type() {
            EventType::Io | EventType::Signal => {
                self.sources.insert(token, source);
            }
            EventType::Defer => {
                self.defer_sources.insert(token, source);
            }
            EventType::Post => {
                self.post_sources.insert(token, source);
            }
            EventType::TimerMonotonic | EventType::TimerRealtime => (),
        }

        self.state.insert(token, State::default());

        Ok(0)
    }

    pub(self) fn has_source(&self, source: Rc<dyn Source>) -> bool {
        self.state.contains_key(&source.token())
    }

    pub(self) fn del_source(&mut self, source: Rc<dyn Source>) -> Result<i32> {
        self.source_offline(&source)?;

        let et = source.event_type();
        let token = source.token();
        match et {
            EventType::Io | EventType::Signal => {
                self.sources.remove(&token);
            }
            EventType::Defer => {
                self.defer_sources.remove(&token).ok_or(Error::Other {
                    word: "item not found",
                })?;
            }
            EventType::Post => {
                self.post_sources.remove(&token).ok_or(Error::Other {
                    word: "item not found",
                })?;
            }
            EventType::TimerMonotonic | EventType::TimerRealtime => {
                if self.timer.is_empty(&et) {
                    if let Some(fd) = self.timerfd.remove(&et) {
                        let _ = self.poller.unregister(fd);
                        let _ = unistd::close(fd);
                    }
                }
            }
        }

        self.state.remove(&token);

        Ok(0)
    }

    pub(self) fn set_enabled(&mut self, source: Rc<dyn Source>, state: EventState) -> Result<i32> {
        let token = source.token();
        if let Some(current) = self.state.get(&token) {
            if current.state == state {
                return Ok(0);
            }
        }

        match state {
            EventState::On | EventState::OneShot => {
                self.source_online(&source)?;
            }
            EventState::Off => {
                self.source_offline(&source)?;
            }
        }

        if let Some(current) = self.state.get_mut(&token) {
            current.state = state;
        }

        Ok(0)
    }

    // when enabled, hook the source into the listening machinery
    pub(self) fn source_online(&mut self, source: &Rc<dyn Source>) -> Result<i32> {
        let et = source.event_type();
        let token = source.token();
        let mut event = libc::epoll_event {
            events: source.epoll_event(),
            u64: token,
        };

        match et {
            EventType::Io => {
                self.poller.register(source.fd(), &mut event)?;
            }
            EventType::Signal => {
                let mut mask = SigSet::empty();
                for sig in source.signals() {
                    mask.add(sig);
                }
                mask.thread_set_mask().context(NixSnafu)?;
                self.signalfd.set_mask(&mask).context(NixSnafu)?;
                self.poller
                    .register(self.signalfd.as_raw_fd(), &mut event)?;
            }
            EventType::TimerMonotonic | EventType::TimerRealtime => {
                if !self.timerfd.contains_key(&et) {
                    let fd = syscall!(timerfd_create(
                        self.timer.clockid(&et),
                        libc::TFD_NONBLOCK | libc::TFD_CLOEXEC
                    ))?;
                    event.u64 = timerfd_token(&et);
                    self.poller.register(fd, &mut event)?;
                    self.timerfd.insert(et, fd);
                }
                self.timer.push(source.clone());
            }
            EventType::Defer => {
                self.pending_push(source.clone());
            }
            EventType::Post => {}
        }

        Ok(0)
    }

    // take the source out of the listening machinery
    pub(self) fn source_offline(&mut self, source: &Rc<dyn Source>) -> Result<i32> {
        // nothing to unhook when the source is already off
        match self.state.get(&source.token()) {
            Some(current) if current.state != EventState::Off => (),
            _ => return Ok(0),
        }

        let et = source.event_type();
        match et {
            EventType::Io => {
                self.poller.unregister(source.fd())?;
            }
            EventType::Signal => {
                self.poller.unregister(self.signalfd.as_raw_fd())?;
            }
            EventType::TimerMonotonic | EventType::TimerRealtime => {
                self.timer.remove(&et, source.clone());
            }
            EventType::Defer | EventType::Post => (),
        }

        Ok(0)
    }

    // a recurring (EventState::On) source fired: put it back in line
    pub(self) fn rearm(&mut self, source: &Rc<dyn Source>) {
        // the callback may have removed the source
        if !self.state.contains_key(&source.token()) {
            return;
        }

        match source.event_type() {
            EventType::TimerMonotonic | EventType::TimerRealtime => {
                self.timer.push(source.clone());
            }
            EventType::Defer => {
                self.pending_push(source.clone());
            }
            _ => (),
        }
    }

    pub(self) fn read_signals(&mut self) -> Option<siginfo> {
        self.signalfd.read_signal().unwrap_or(None)
    }

    /// Arm the timerfds for the earliest deadlines. Returns true if there is
    /// something pending already, in which case the caller may skip waiting.
    pub(self) fn prepare(&mut self) -> bool {
        let mut ready = false;

        for et in TIMER_TYPES {
            let next = match self.timer.next(&et) {
                None => continue,
                Some(v) => v,
            };

            if self.timer.clock_now(&et) >= next {
                while let Some(source) = self.timer.pop(&et) {
                    self.pending_push(source);
                }
                ready = true;
            } else if let Some(fd) = self.timerfd.get(&et) {
                let new_value = self.timer.timer_stored(next);
                let mut old_value = MaybeUninit::<libc::itimerspec>::zeroed();
                unsafe {
                    libc::timerfd_settime(
                        *fd,
                        libc::TFD_TIMER_ABSTIME,
                        &new_value,
                        old_value.as_mut_ptr(),
                    );
                }
            }
        }

        if !self.pending.is_empty() {
            // collect whatever io is ready as well, without blocking
            self.wait(0);
            return true;
        }

        ready
    }

    /// Wait for events through the poller and queue the raised sources.
    pub(self) fn wait(&mut self, timeout: i32) -> bool {
        let events = match self.poller.poll(timeout) {
            Ok(v) => v,
            Err(_) => return false,
        };

        for event in events.iter() {
            let token = event.u64;
            if let Some(source) = self.sources.get(&token).cloned() {
                self.pending_push(source);
            }
        }

        for et in TIMER_TYPES {
            let next = match self.timer.next(&et) {
                None => continue,
                Some(v) => v,
            };
            if self.timer.clock_now(&et) < next {
                continue;
            }
            self.flush_timerfd(&et);
            while let Some(source) = self.timer.pop(&et) {
                self.pending_push(source);
            }
        }

        !self.pending.is_empty()
    }

    pub(self) fn pending_pop(&mut self) -> Option<Rc<dyn Source>> {
        let top = self.pending.pop()?;
        if let Some(state) = self.state.get_mut(&top.token()) {
            state.in_pending = false;
        }
        Some(top)
    }

    pub(self) fn pending_push(&mut self, source: Rc<dyn Source>) {
        if let Some(current) = self.state.get_mut(&source.token()) {
            if !current.in_pending {
                self.pending.push(source);
                current.in_pending = true;
            }
        }
    }

    pub(self) fn pending_posts(&mut self) {
        let posts = self.post_sources.values().cloned().collect::<Vec<_>>();
        for source in posts {
            if let Some(current) = self.state.get(&source.token()) {
                if current.state == EventState::Off {
                    continue;
                }
            }
            self.pending_push(source);
        }
    }

    pub(self) fn source_state(&self, token: u64) -> Option<State> {
        self.state.get(&token).cloned()
    }

    pub(self) fn set_exit(&mut self) {
        self.exit = true;
    }

    pub(self) fn exit(&self) -> bool {
        self.exit
    }

    // drain one expiration off the timerfd so it stops polling readable
    fn flush_timerfd(&self, et: &EventType) {
        if let Some(fd) = self.timerfd.get(et) {
            let _ = unistd::read(*fd, &mut [0u8; 8]);
        }
    }

    fn clear(&mut self) {
        self.sources.clear();
        self.defer_sources.clear();
        self.post_sources.clear();
        self.pending.clear();
        self.state.clear();
        for (_, fd) in self.timerfd.drain() {
            let _ = unistd::close(fd);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        cnt: Cell<u32>,
        usec: u64,
        et: EventType,
    }

    impl Counter {
        fn new(usec: u64, et: EventType) -> Counter {
            Counter {
                cnt: Cell::new(0),
                usec,
                et,
            }
        }
    }

    impl Source for Counter {
        fn event_type(&self) -> EventType {
            self.et
        }

        fn time_relative(&self) -> u64 {
            self.usec
        }

        fn token(&self) -> u64 {
            let data: u64 = unsafe { std::mem::transmute(self) };
            data
        }

        fn dispatch(&self, _: &Events) -> i32 {
            self.cnt.set(self.cnt.get() + 1);
            0
        }
    }

    #[test]
    fn timer_oneshot() {
        let e = Events::new().unwrap();
        let s = Rc::new(Counter::new(1000, EventType::TimerMonotonic));
        e.add_source(s.clone()).unwrap();
        e.set_enabled(s.clone(), EventState::OneShot).unwrap();

        while s.cnt.get() == 0 {
            e.run(10).unwrap();
        }
        assert_eq!(s.cnt.get(), 1);

        // a one-shot source does not fire twice
        for _ in 0..5 {
            e.run(1).unwrap();
        }
        assert_eq!(s.cnt.get(), 1);

        e.del_source(s).unwrap();
    }

    #[test]
    fn timer_recurring() {
        let e = Events::new().unwrap();
        let s = Rc::new(Counter::new(100, EventType::TimerMonotonic));
        e.add_source(s.clone()).unwrap();
        e.set_enabled(s.clone(), EventState::On).unwrap();

        while s.cnt.get() < 3 {
            e.run(10).unwrap();
        }
        assert!(s.cnt.get() >= 3);

        e.set_enabled(s.clone(), EventState::Off).unwrap();
        e.del_source(s).unwrap();
    }

    #[test]
    fn defer_oneshot() {
        let e = Events::new().unwrap();
        let s = Rc::new(Counter::new(0, EventType::Defer));
        e.add_source(s.clone()).unwrap();
        e.set_enabled(s.clone(), EventState::OneShot).unwrap();

        e.run(0).unwrap();
        assert_eq!(s.cnt.get(), 1);
        e.run(0).unwrap();
        assert_eq!(s.cnt.get(), 1);
    }

    #[test]
    fn exit_breaks_rloop() {
        struct Quit;
        impl Source for Quit {
            fn event_type(&self) -> EventType {
                EventType::Defer
            }
            fn token(&self) -> u64 {
                let data: u64 = unsafe { std::mem::transmute(self) };
                data
            }
            fn dispatch(&self, e: &Events) -> i32 {
                e.set_exit();
                0
            }
        }

        let e = Events::new().unwrap();
        let s = Rc::new(Quit);
        e.add_source(s.clone()).unwrap();
        e.set_enabled(s, EventState::OneShot).unwrap();
        e.rloop().unwrap();
    }
}
