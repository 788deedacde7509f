// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

pub mod config;
pub mod connection;
pub mod consumer;
pub mod driver;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod message;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod transport;
pub mod types;
