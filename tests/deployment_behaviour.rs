//! Behavioural scenarios for the deployment workflow.

mod deployment;
