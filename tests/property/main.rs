// tests/property/main.rs

mod events;
mod properties;
mod tasks;
