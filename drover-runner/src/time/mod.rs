// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod kill_clock;
mod stopwatch;

pub(crate) use kill_clock::*;
pub(crate) use stopwatch::*;
