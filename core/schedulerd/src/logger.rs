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

//! Console logging for the daemon, plus the one-line job status output.

use log::{LevelFilter, Log, Metadata, Record};
use std::io::Write;

struct ConsoleLogger {
    name: String,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let time: libc::time_t = unsafe { libc::time(std::ptr::null_mut()) };
        let now = unsafe { libc::localtime(&time) };
        let now_str = unsafe {
            format!(
                "{:0>4}-{:0>2}-{:0>2} {:0>2}:{:0>2}:{:0>2}",
                (*now).tm_year + 1900, /* tm_year is years since 1900 */
                (*now).tm_mon + 1,     /* tm_mon is months since Jan: [0, 11] */
                (*now).tm_mday,
                (*now).tm_hour,
                (*now).tm_min,
                (*now).tm_sec
            )
        };

        let mut err = std::io::stderr();
        if let Err(e) = writeln!(
            err,
            "{} {} {} {}",
            now_str,
            self.name,
            record.level(),
            record.args()
        ) {
            println!("Failed to log message: {}", e);
        }
    }

    fn flush(&self) {}
}

/// Install the console logger. Safe to call more than once; only the first
/// call wins.
pub(crate) fn init_log_to_console(name: &str, level: LevelFilter) {
    let logger = Box::new(ConsoleLogger {
        name: name.to_string(),
    });
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

/// The verdict column of a job status line.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum StatusBracket {
    Ok,
    Fail,
    Time,
    Cancel,
}

// width of the left column before the status bracket
const STATUS_COLUMN: usize = 60;

/// One padded line per completed job, with a colored right-justified status
/// bracket, like `Started network.target  ...  [  OK  ]`.
pub(crate) fn console_line(left: &str, bracket: StatusBracket) {
    let verdict = match bracket {
        StatusBracket::Ok => "\x1b[0;32m[  OK  ]\x1b[0m",
        StatusBracket::Fail => "\x1b[0;31m[ Fail ]\x1b[0m",
        StatusBracket::Time => "\x1b[0;33m[ Time ]\x1b[0m",
        StatusBracket::Cancel => "\x1b[0;37m[Cancel]\x1b[0m",
    };
    println!("{:<width$}{}", left, verdict, width = STATUS_COLUMN);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_log_to_console("test", LevelFilter::Debug);
        init_log_to_console("test", LevelFilter::Info);
        log::info!("hello, info!");
    }

    #[test]
    fn console_lines_do_not_panic() {
        console_line("Started default.target", StatusBracket::Ok);
        console_line("Failed starting db.service", StatusBracket::Fail);
        console_line("Timed out starting slow.service", StatusBracket::Time);
        console_line("Cancelled starting late.service", StatusBracket::Cancel);
    }
}
