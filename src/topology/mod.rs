// SPDX-License-Identifier: Apache-2.0

pub mod batch;
pub mod spooler;

pub use batch::SpoolConfig;
pub use spooler::Spooler;
