// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

const PROTOCOLS: [&str; 4] = ["serial", "modbus_tcp", "opcua", "visa"];

/// Prints the versions of the binary and the libraries it was built with.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("{} {}", crate::NAME, crate::VERSION);
    println!("  ccb-core   {}", ccb_core::VERSION);
    println!("  ccb-config {}", ccb_config::VERSION);
    println!("  platform   {}-{}", std::env::consts::ARCH, std::env::consts::OS);
    println!("  protocols  {}", PROTOCOLS.join(", "));
    Ok(())
}
