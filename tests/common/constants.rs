//! Known titles served by the fake metadata service.

#![allow(dead_code)]

pub const INCEPTION_ID: u64 = 27205;
pub const INCEPTION_FILE: &str = "Inception.2010.1080p.BluRay.x264.mkv";
pub const INCEPTION_FOLDER: &str = "Inception (2010) {tmdb-27205}";

pub const BREAKING_BAD_ID: u64 = 1396;
pub const BREAKING_BAD_EPISODE_FILE: &str = "Breaking.Bad.S01E02.720p.WEB-DL.mkv";
pub const BREAKING_BAD_FOLDER: &str = "Breaking Bad (2008) {tmdb-1396}";

/// A title the fake service has never heard of.
pub const UNKNOWN_FILE: &str = "Completely.Unknown.Home.Video.2019.mp4";
