//! Download media with yt-dlp and normalize it to `.mp4` with ffmpeg.
//!
//! The [`orchestrator`] runs one job at a time. Each job fetches, converts
//! per item with failures isolated, and supports cooperative cancellation.
//! [`server`] and the binary's `download` command are the front ends.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod models;
pub mod observer;
pub mod orchestrator;
pub mod process;
pub mod sanitize;
pub mod server;
pub mod transcode;
pub mod update;
pub mod ytdlp;
