//! 2-channel UHJ encoder CLI
//!
//! Converts each input file into `<basename>.uhj.flac` in the current
//! working directory. A single file's failure does not stop the run.

use std::path::Path;
use std::process::ExitCode;

use ambiweave::{encode_file, output_name};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "-h" || args[1] == "--help" {
        println!("Usage: {} <infile...>\n", args[0]);
        return ExitCode::from(1);
    }

    let mut num_files = 0usize;
    let mut num_encoded = 0usize;
    for arg in &args[1..] {
        num_files += 1;

        let input = Path::new(arg);
        let output = output_name(input);
        println!("Converting {} to {}...", input.display(), output.display());

        match encode_file(input, &output) {
            Ok(stats) => {
                println!(
                    " ... wrote {} samples ({}).",
                    stats.frames_written,
                    stats.input_frames.unwrap_or(0)
                );
                num_encoded += 1;
            }
            Err(e) => {
                eprintln!(" ... {}", e);
            }
        }
    }

    if num_encoded == 0 {
        eprintln!("Failed to encode any input files");
    } else if num_encoded < num_files {
        eprintln!("Encoded {} of {} files", num_encoded, num_files);
    } else {
        println!(
            "Encoded {}{} file{}",
            if num_encoded > 1 { "all " } else { "" },
            num_encoded,
            if num_encoded == 1 { "" } else { "s" }
        );
    }
    ExitCode::SUCCESS
}
