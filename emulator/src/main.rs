mod engine;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use crossterm::style::Stylize;

use session::{Response, Session, Tone};

fn main() -> io::Result<()> {
    let transcript = parse_transcript_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: avcs-emulator [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(transcript.as_deref())?;
    let mut line = String::new();

    writeln!(
        writer,
        "AVCS Controller Emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            write_response(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn write_response(writer: &mut impl Write, response: &Response) -> io::Result<()> {
    let text = response.text.as_str();
    match response.tone {
        Tone::Plain => writeln!(writer, "{text}"),
        Tone::Good => writeln!(writer, "{}", text.green()),
        Tone::Warn => writeln!(writer, "{}", text.yellow()),
        Tone::Bad => writeln!(writer, "{}", text.red().bold()),
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_transcript_path() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(None);
    };
    if let Some(value) = arg.strip_prefix("--transcript=") {
        Ok(Some(PathBuf::from(value)))
    } else if arg == "--transcript" {
        args.next()
            .map(|value| Some(PathBuf::from(value)))
            .ok_or_else(|| "Expected value after --transcript".to_string())
    } else {
        Err(format!("Unknown argument `{arg}`"))
    }
}
