mod chip;
mod session;

use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use session::{Options, Session};

const USAGE: &str = "Usage: power-emulator [--edge-at-ms <n>]... [--no-edge] [--transcript <path>] [--boots <n>]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let mut session = Session::new(options, Box::new(io::stdout()))?;
    let report = session.run()?;
    eprintln!(
        "{} boot(s), wake reasons {:?}, edges accepted={} dropped={}",
        report.boots, report.wake_reasons, report.accepted_edges, report.dropped_edges
    );
    Ok(())
}

fn parse_options<I>(args: I) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut edges = Vec::new();
    let mut no_edge = false;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        match flag.as_str() {
            "--no-edge" => no_edge = true,
            "--edge-at-ms" => edges.push(parse_number(&flag, &value(&flag, inline, &mut args)?)?),
            "--transcript" => {
                options.transcript = Some(PathBuf::from(value(&flag, inline, &mut args)?));
            }
            "--boots" => {
                let boots = parse_number(&flag, &value(&flag, inline, &mut args)?)?;
                options.boots = u32::try_from(boots)
                    .ok()
                    .filter(|&boots| boots > 0)
                    .ok_or_else(|| format!("--boots must be between 1 and {}", u32::MAX))?;
            }
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    if no_edge && !edges.is_empty() {
        return Err("--no-edge cannot be combined with --edge-at-ms".to_string());
    }
    if no_edge {
        options.edges_at_ms.clear();
    } else if !edges.is_empty() {
        options.edges_at_ms = edges;
    }
    Ok(options)
}

fn value(
    flag: &str,
    inline: Option<String>,
    rest: &mut impl Iterator<Item = String>,
) -> Result<String, String> {
    inline
        .or_else(|| rest.next())
        .ok_or_else(|| format!("Expected value after {flag}"))
}

fn parse_number(flag: &str, raw: &str) -> Result<u64, String> {
    raw.parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got `{raw}`"))
}
