//! tfgraph — Terraform module dependency graph.
//!
//! Discovers modules laid out as `service/environment/region/module[/submodule]`,
//! infers edges from `terraform_remote_state` references and turns them into
//! cycle-checked, parallel execution levels.

pub mod cli;
pub mod core;
