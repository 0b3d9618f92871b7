// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

use orion::args;
use orion::runner;

fn main() {
    let args = args::Args::parse();

    if let Err(e) = runner::run(&args) {
        eprintln!("orion: {:#}", e);
        std::process::exit(1);
    }
}
