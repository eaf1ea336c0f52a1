// ============================================================================
// gpu-rotate CLI — rotate one TGA image on the GPU
// ============================================================================
//
// Usage examples:
//   gpu-rotate 90                                   (lenna.tga → lenna_rotated.tga)
//   gpu-rotate -45 -i photo.tga -o tilted.tga
//   gpu-rotate --platform second-if-many 30
//   gpu-rotate --list-devices
//   gpu-rotate                                      (asks for the angle)
//
// Order of work: kernel source → angle → device → compile → decode →
// rotate → encode.  The output file only appears after a full round trip.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use crate::error::RotateError;
use crate::gpu::context::list_platforms;
use crate::gpu::{CompiledProgram, DeviceContext, KernelSource, PlatformPolicy, SelectorConfig};
use crate::pipeline::Pipeline;
use crate::{io, log_err, log_info, logger};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Rotate a truecolor TGA image by an arbitrary angle on the GPU.
#[derive(Parser, Debug)]
#[command(
    name = "gpu-rotate",
    about = "Rotate a TGA image on the GPU",
    long_about = "Rotates an uncompressed 24/32-bit TGA image around its centre using a\n\
                  WGSL compute kernel. Pixels that rotate in from outside the image are\n\
                  black. Nearest-neighbour sampling only.\n\n\
                  Example:\n  \
                  gpu-rotate 90 --input lenna.tga --output lenna_rotated.tga"
)]
pub struct CliArgs {
    /// Rotation angle in whole degrees. Asked for interactively when omitted.
    #[arg(allow_negative_numbers = true, value_name = "DEGREES")]
    pub angle: Option<i32>,

    /// Input image (TGA, RGB or RGBA).
    #[arg(short, long, default_value = "lenna.tga", value_name = "FILE")]
    pub input: PathBuf,

    /// Output image (TGA). Written only if the whole rotation succeeds.
    #[arg(short, long, default_value = "lenna_rotated.tga", value_name = "FILE")]
    pub output: PathBuf,

    /// WGSL kernel source, relative to the working directory.
    #[arg(short, long, default_value = "rotation.wgsl", value_name = "FILE")]
    pub kernel: PathBuf,

    /// Platform selection heuristic.
    #[arg(long, value_enum, default_value_t = PlatformChoice::PreferGpu)]
    pub platform: PlatformChoice,

    /// Use this platform index instead of a heuristic.
    #[arg(long, value_name = "N")]
    pub platform_index: Option<usize>,

    /// Print every platform and device, then exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Echo log lines to stderr.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log file location (default: per-user data directory).
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformChoice {
    /// First platform with a GPU device.
    PreferGpu,
    /// Second platform whenever more than one exists.
    SecondIfMany,
    /// Second platform only when exactly two exist.
    SecondIfTwo,
}

impl CliArgs {
    pub fn selector_config(&self) -> SelectorConfig {
        let policy = match (self.platform_index, self.platform) {
            (Some(i), _) => PlatformPolicy::Index(i),
            (None, PlatformChoice::PreferGpu) => PlatformPolicy::PreferGpu,
            (None, PlatformChoice::SecondIfMany) => PlatformPolicy::SecondIfMany,
            (None, PlatformChoice::SecondIfTwo) => PlatformPolicy::SecondIfTwo,
        };
        SelectorConfig {
            policy,
            ..SelectorConfig::default()
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the tool and return an OS exit code (`0` success, `1` failure).
pub fn run(args: CliArgs) -> ExitCode {
    logger::init(args.log_file.as_deref());
    logger::set_echo(args.verbose);

    match try_run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// The whole run, with failures returned instead of printed.
pub fn try_run(args: &CliArgs) -> Result<(), RotateError> {
    let config = args.selector_config();
    if args.list_devices {
        print_platforms(config.backends);
        return Ok(());
    }

    let source = KernelSource::load(&args.kernel)?;

    let degrees = match args.angle {
        Some(d) => d,
        None => {
            let stdin = std::io::stdin();
            prompt_angle(&mut stdin.lock(), &mut std::io::stdout())?
        }
    };

    let start = Instant::now();
    let context = DeviceContext::select(&config)?;
    log_info!("Using {}", context);
    println!("Selected Platform Information:");
    for line in context.diagnostics() {
        println!("  {}", line);
    }

    let program = CompiledProgram::build(&context, &source)?;
    let pipeline = Pipeline { program, context };

    let image = io::decode(&args.input)?;
    println!(
        "Image loaded: {} ({}x{}, {} bpp)",
        args.input.display(),
        image.width(),
        image.height(),
        image.bits_per_pixel()
    );

    println!("Rotating by {} degrees", degrees);
    let rotated = pipeline.rotate_degrees(&image, degrees)?;
    println!("Received data from device");

    io::encode(&rotated, &args.output)?;
    println!(
        "Image written: {} ({:.0}ms)",
        args.output.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    log_info!("Wrote {}", args.output.display());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Ask for the angle on `output` and read one line from `input`.
pub fn prompt_angle<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<i32, RotateError> {
    let _ = write!(output, "Rotation angle in degrees: ");
    let _ = output.flush();

    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|e| RotateError::InvalidAngle(e.to_string()))?;
    let trimmed = line.trim();
    trimmed
        .parse::<i32>()
        .map_err(|_| RotateError::InvalidAngle(trimmed.to_string()))
}

/// Print a failure for the operator and log it.  Compile failures show the
/// compiler log and build options in full.
fn report(e: &RotateError) {
    match e {
        RotateError::CompileError { log, options } => {
            eprintln!("error: kernel compilation failed");
            eprintln!("Build log:\n{}", log);
            eprintln!("Build options: {}", options);
            log_err!("Kernel compilation failed ({})\n{}", options, log);
        }
        other => {
            eprintln!("error: {}", other);
            log_err!("{}", other);
        }
    }
    if let Some(path) = logger::log_path() {
        eprintln!("(log: {})", path.display());
    }
}

fn print_platforms(backends: wgpu::Backends) {
    let platforms = list_platforms(backends);
    if platforms.is_empty() {
        println!("No compute platforms available on {:?}", backends);
        return;
    }
    for (i, platform) in platforms.iter().enumerate() {
        println!("Platform {}: {}", i, platform.name());
        for (j, info) in platform.adapters.iter().enumerate() {
            println!(
                "  Device {}: {} ({:?}) vendor 0x{:04x} driver {} {}",
                j, info.name, info.device_type, info.vendor, info.driver, info.driver_info
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_angle_parses_as_positional() {
        let args = CliArgs::try_parse_from(["gpu-rotate", "-45"]).unwrap();
        assert_eq!(args.angle, Some(-45));
        assert_eq!(args.input, PathBuf::from("lenna.tga"));
        assert_eq!(args.kernel, PathBuf::from("rotation.wgsl"));
    }

    #[test]
    fn angle_is_optional() {
        let args = CliArgs::try_parse_from(["gpu-rotate", "-i", "a.tga", "-o", "b.tga"]).unwrap();
        assert_eq!(args.angle, None);
        assert_eq!(args.output, PathBuf::from("b.tga"));
    }

    #[test]
    fn platform_index_overrides_heuristic() {
        let args =
            CliArgs::try_parse_from(["gpu-rotate", "--platform", "second-if-two", "--platform-index", "2"]).unwrap();
        assert_eq!(args.selector_config().policy, PlatformPolicy::Index(2));

        let args = CliArgs::try_parse_from(["gpu-rotate", "--platform", "second-if-many"]).unwrap();
        assert_eq!(args.selector_config().policy, PlatformPolicy::SecondIfMany);

        let args = CliArgs::try_parse_from(["gpu-rotate"]).unwrap();
        assert_eq!(args.selector_config().policy, PlatformPolicy::PreferGpu);
    }

    #[test]
    fn prompt_reads_one_line() {
        let mut input = std::io::Cursor::new(b" 135 \n".to_vec());
        let mut output = Vec::new();
        assert_eq!(prompt_angle(&mut input, &mut output).unwrap(), 135);
        assert_eq!(String::from_utf8(output).unwrap(), "Rotation angle in degrees: ");
    }

    #[test]
    fn prompt_rejects_fractional_degrees() {
        let mut input = std::io::Cursor::new(b"12.5\n".to_vec());
        assert!(matches!(
            prompt_angle(&mut input, &mut Vec::new()),
            Err(RotateError::InvalidAngle(s)) if s == "12.5"
        ));
    }

    #[test]
    fn missing_kernel_fails_before_device_work() {
        let args = CliArgs::try_parse_from([
            "gpu-rotate",
            "90",
            "--kernel",
            "no/such/kernel.wgsl",
            "--output",
            "no/such/out.tga",
        ])
        .unwrap();
        assert!(matches!(try_run(&args), Err(RotateError::SourceNotFound { .. })));
    }
}
