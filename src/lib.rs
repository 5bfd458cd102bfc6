pub mod action;
pub mod boundary;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dqn;
pub mod episode;
pub mod event_loop;
pub mod game_input;
pub mod knowledge;
pub mod log;
pub mod network;
pub mod player;
pub mod replay_buffer;
pub mod reward;
pub mod snapshot;
pub mod utils;
