//! Simulated hardware for exercising tugboat-canbus channels without a CAN bus
pub mod sim_adapter;
pub mod sim_link;
