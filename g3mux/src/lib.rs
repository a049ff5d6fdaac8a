/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod build;

pub mod config;
pub mod module;
pub mod opts;
pub mod serve;
