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

//! schedulerd: a dependency-aware service scheduler daemon.

mod config;
mod error;
mod job;
mod logger;
mod manager;
mod restarter;
mod unit;

use crate::config::SchedConfig;
use crate::error::*;
use crate::job::JobKind;
use crate::manager::Manager;
use crate::unit::{StaticLoader, UnitSpec};
use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;

/// parse program arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// The unit brought to Start at boot, overriding the configuration.
    #[clap(long)]
    unit: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = SchedConfig::load(args.config.as_deref());
    logger::init_log_to_console("schedulerd", config.log_level_filter());

    let boot_unit = args.unit.unwrap_or_else(|| config.default_unit.clone());
    log::info!("schedulerd starting, boot unit {}.", boot_unit);

    let manager = Manager::new(&config)?;

    // without a front-end handing in definitions, the boot target itself is
    // the entire configuration
    let loader = Rc::new(StaticLoader::new(manager.db()));
    loader.insert(UnitSpec {
        aliases: vec![boot_unit.clone()],
        unit_type: String::from("target"),
        out_edges: vec![],
        in_edges: vec![],
    });
    manager.set_loader(loader);

    manager.db().units_get_or_create(&boot_unit);
    manager.dispatch_load_queue();
    manager.enqueue(&boot_unit, JobKind::Start)?;

    manager.run()?;
    log::info!("schedulerd exiting.");
    Ok(())
}
