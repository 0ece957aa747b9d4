//! Build script for avfeed
//!
//! Only does work when the `ffmpeg` feature is enabled:
//! - FFmpeg library detection (pkg-config, `FFMPEG_DIR`, platform defaults)
//! - Install hints when the libraries cannot be found
//!
//! Linking itself is left to `ffmpeg-sys-next`; this script only makes a
//! missing installation obvious before the much noisier bindgen failure.

use std::env;
use std::path::PathBuf;

/// Libraries the FFmpeg-backed collaborators need
const FFMPEG_LIBRARIES: [&str; 6] = [
    "libavcodec",
    "libavformat",
    "libavutil",
    "libavfilter",
    "libswscale",
    "libswresample",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");

    if env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    match detect_ffmpeg(&target_os) {
        Ok(location) => println!("cargo:warning=Using FFmpeg from {}", location),
        Err(missing) => {
            println!("cargo:warning=FFmpeg development files not found: {}", missing.join(", "));
            print_install_hints(&target_os);
        }
    }
}

/// Locate the FFmpeg libraries, returning a description of where they were found
fn detect_ffmpeg(target_os: &str) -> Result<String, Vec<String>> {
    let missing: Vec<String> = FFMPEG_LIBRARIES
        .iter()
        .filter(|lib| {
            pkg_config::Config::new()
                .cargo_metadata(false)
                .probe(lib)
                .is_err()
        })
        .map(|lib| lib.to_string())
        .collect();

    if missing.is_empty() {
        return Ok("pkg-config".to_string());
    }

    if let Ok(ffmpeg_dir) = env::var("FFMPEG_DIR") {
        let path = PathBuf::from(ffmpeg_dir);
        if path.join("include").exists() && path.join("lib").exists() {
            return Ok(path.display().to_string());
        }
    }

    for path in default_ffmpeg_paths(target_os) {
        if path.join("include").join("libavcodec").exists() {
            return Ok(path.display().to_string());
        }
    }

    Err(missing)
}

/// Default FFmpeg installation prefixes for each platform
fn default_ffmpeg_paths(target_os: &str) -> Vec<PathBuf> {
    match target_os {
        "windows" => vec![
            PathBuf::from("C:\\ffmpeg"),
            PathBuf::from("C:\\Program Files\\ffmpeg"),
        ],
        "macos" => vec![
            PathBuf::from("/usr/local"),
            PathBuf::from("/opt/homebrew"),
            PathBuf::from("/opt/local"),
        ],
        "linux" => vec![
            PathBuf::from("/usr"),
            PathBuf::from("/usr/local"),
            PathBuf::from("/opt/ffmpeg"),
        ],
        _ => vec![],
    }
}

fn print_install_hints(target_os: &str) {
    match target_os {
        "windows" => {
            println!("cargo:warning=  Download a shared build and set FFMPEG_DIR to its root");
        }
        "macos" => {
            println!("cargo:warning=  Run: brew install ffmpeg");
        }
        "linux" => {
            println!("cargo:warning=  Ubuntu/Debian: sudo apt install libavcodec-dev libavformat-dev libavfilter-dev libswscale-dev libswresample-dev");
            println!("cargo:warning=  Fedora: sudo dnf install ffmpeg-devel");
        }
        _ => {}
    }
}
