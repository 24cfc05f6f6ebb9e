use crate::formats::Category;

/// Frame rate and width cap for animated GIF output
const GIF_FPS: u32 = 10;
const GIF_MAX_WIDTH: u32 = 480;

/// Build the ffmpeg argument vector for one conversion.
///
/// Pure and total: combinations without a dedicated policy fall through to
/// `-i <input> <output>` plus whatever the category adds. Names must already
/// be sanitised; nothing is escaped here.
pub fn build_args(input: &str, output: &str, format: &str, category: Category) -> Vec<String> {
    let mut args = Vec::new();

    args.push("-i".to_string());
    args.push(input.to_string());

    match category {
        Category::Video => push_video_args(&mut args, format),
        Category::Audio => push_audio_args(&mut args, format),
        Category::Image => push_image_args(&mut args, format),
        Category::Unknown => {}
    }

    args.push(output.to_string());
    args
}

fn push_video_args(args: &mut Vec<String>, format: &str) {
    match format {
        "gif" => {
            // Low frame rate and capped width keep the palette pass affordable
            args.push("-vf".to_string());
            args.push(format!("fps={},scale={}:-1:flags=lanczos", GIF_FPS, GIF_MAX_WIDTH));
            args.push("-f".to_string());
            args.push("gif".to_string());
        }
        "webm" => {
            args.push("-c:v".to_string());
            args.push("libvpx".to_string());
            args.push("-crf".to_string());
            args.push("30".to_string());
            args.push("-b:v".to_string());
            args.push("0".to_string());
            args.push("-c:a".to_string());
            args.push("libvorbis".to_string());
        }
        "mp4" | "mkv" => {
            // ultrafast: conversion speed over compression on slow client hardware
            push_h264(args);
            args.push("-c:a".to_string());
            args.push("aac".to_string());
        }
        _ => push_h264(args),
    }
}

fn push_h264(args: &mut Vec<String>) {
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push("ultrafast".to_string());
    args.push("-crf".to_string());
    args.push("28".to_string());
}

fn push_audio_args(args: &mut Vec<String>, format: &str) {
    match format {
        "mp3" => {
            args.push("-c:a".to_string());
            args.push("libmp3lame".to_string());
            args.push("-q:a".to_string());
            args.push("4".to_string());
        }
        "aac" => {
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            args.push("-b:a".to_string());
            args.push("128k".to_string());
        }
        "ogg" => {
            args.push("-c:a".to_string());
            args.push("libvorbis".to_string());
            args.push("-q:a".to_string());
            args.push("4".to_string());
        }
        "flac" => {
            args.push("-c:a".to_string());
            args.push("flac".to_string());
        }
        "wav" => {
            args.push("-c:a".to_string());
            args.push("pcm_s16le".to_string());
        }
        _ => {}
    }
}

fn push_image_args(args: &mut Vec<String>, format: &str) {
    // Single still frame; the muxer picks the codec from the extension
    match format {
        "jpg" | "jpeg" => {
            args.push("-update".to_string());
            args.push("1".to_string());
            args.push("-q:v".to_string());
            args.push("2".to_string());
        }
        "webp" => {
            args.push("-update".to_string());
            args.push("1".to_string());
            args.push("-q:v".to_string());
            args.push("75".to_string());
        }
        "bmp" => {
            args.push("-update".to_string());
            args.push("1".to_string());
            args.push("-pix_fmt".to_string());
            args.push("bgr24".to_string());
        }
        "png" | "tiff" => {
            args.push("-update".to_string());
            args.push("1".to_string());
        }
        _ => {}
    }
}
