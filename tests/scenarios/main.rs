//! Scenario tests: whole pipeline runs against in-memory fakes

mod helpers;

mod build_failure;
mod deploy_ordering;
mod fresh_run;
mod host_isolation;
mod repeated_run;
