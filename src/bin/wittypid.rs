use color_eyre::eyre::Result;
use std::io::{self, BufRead};
use tracing_subscriber::EnvFilter;
use wittypi::*;

/// Format used for times in responses
const TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("wittypi=warn")),
        )
        .with_writer(io::stderr)
        .compact()
        .init();
    color_eyre::install()?;

    // Optional bus number as the only argument
    let usage = "Usage: wittypid [i2c bus]";
    let mut config = BoardConfig::default();
    if let Some(arg) = std::env::args().nth(1) {
        if arg == "-h" || arg == "--help" {
            eprintln!("{usage}");
            std::process::exit(0);
        }
        match arg.parse() {
            Ok(bus) => config.i2c_bus = bus,
            Err(_) => {
                eprintln!("{usage}");
                std::process::exit(1);
            }
        }
    }

    let board = WittyPi::from_config(config);

    // Inform about successful initialization
    println!("OK");

    // Mainloop: one command per line until stdin closes
    for line in io::stdin().lock().lines() {
        let line = line?;
        let (command, argument) = split_command(&line);

        match run(&board, command, argument) {
            Ok(response) if response.is_empty() => println!("OK"),
            Ok(response) => println!("OK {response}"),
            Err(e) => println!("ERR {e}"),
        }
    }

    Ok(())
}

/// Splits `command[:argument]`, an empty argument counts as none
fn split_command(line: &str) -> (&str, Option<&str>) {
    match line.trim().split_once(':') {
        Some((command, argument)) => (
            command.trim(),
            Some(argument.trim()).filter(|a| !a.is_empty()),
        ),
        None => (line.trim(), None),
    }
}

fn run<P: BusProvider>(
    board: &WittyPi<P, chrono::FixedOffset>,
    command: &str,
    argument: Option<&str>,
) -> std::result::Result<String, String> {
    let schedule = |next: wittypi::Result<Option<ScheduleOccurrence<chrono::FixedOffset>>>| {
        next.map(|next| match next {
            Some(o) => format!("{} {}", o.local.format(TIME_FORMAT), o.display),
            None => "never".to_string(),
        })
        .map_err(|e| e.to_string())
    };

    match (command, argument) {
        ("status", None) => board
            .status()
            .map(|s| {
                format!(
                    "{} {} {:.2} {:.2} {:.2} {:.2}",
                    s.rtc.local.format(TIME_FORMAT),
                    s.rtc.unix,
                    s.input_voltage,
                    s.output_voltage,
                    s.output_current,
                    s.temperature
                )
            })
            .map_err(|e| e.to_string()),
        ("startup", None) => schedule(board.startup_time()),
        ("shutdown", None) => schedule(board.shutdown_time()),
        ("set_startup", Some(text)) => board
            .set_startup_time(text)
            .map(|_| String::new())
            .map_err(|e| e.to_string()),
        ("set_shutdown", Some(text)) => board
            .set_shutdown_time(text)
            .map(|_| String::new())
            .map_err(|e| e.to_string()),
        ("clear_startup", None) => board
            .clear_startup_time()
            .map(|_| String::new())
            .map_err(|e| e.to_string()),
        ("clear_shutdown", None) => board
            .clear_shutdown_time()
            .map(|_| String::new())
            .map_err(|e| e.to_string()),
        ("set_startup" | "set_shutdown", None) => Err(format!("{command} needs a schedule")),
        ("", _) => Err("No command given".to_string()),
        (other, _) => Err(format!("Unknown command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Registers(Arc<Mutex<HashMap<(u16, u8), u8>>>);

    impl I2cBus for Registers {
        fn read_byte(&mut self, _addr: u16) -> wittypi::Result<u8> {
            Ok(0)
        }

        fn read_byte_data(&mut self, addr: u16, register: u8) -> wittypi::Result<u8> {
            Ok(self.0.lock().get(&(addr, register)).copied().unwrap_or(0))
        }

        fn write_byte_data(&mut self, addr: u16, register: u8, value: u8) -> wittypi::Result<()> {
            self.0.lock().insert((addr, register), value);
            Ok(())
        }
    }

    impl BusProvider for Registers {
        type Bus = Registers;

        fn open(&self) -> wittypi::Result<Registers> {
            Ok(self.clone())
        }
    }

    fn board() -> (Registers, WittyPi<Registers, FixedOffset>) {
        let registers = Registers::default();
        let board = WittyPi::new(
            registers.clone(),
            BoardConfig::default(),
            FixedOffset::east_opt(0).unwrap(),
        );
        (registers, board)
    }

    #[test]
    fn empty_argument_counts_as_none() {
        assert_eq!(split_command("status"), ("status", None));
        assert_eq!(split_command("status:"), ("status", None));
        assert_eq!(split_command(" set_startup : ?? 07:30 "), ("set_startup", Some("?? 07:30")));
        assert_eq!(split_command("set_startup:  "), ("set_startup", None));
    }

    #[test]
    fn status_with_trailing_colon_is_answered() {
        let (registers, board) = board();
        // 2024-01-01 00:00:00
        registers.0.lock().extend([((0x68, 4), 0x01), ((0x68, 5), 0x01), ((0x68, 6), 0x24)]);
        let (command, argument) = split_command("status:");
        let answer = run(&board, command, argument).unwrap();
        assert!(answer.starts_with("2024-01-01_00-00-00 1704067200 "), "{answer}");
    }

    #[test]
    fn set_schedule_needs_an_argument() {
        let (registers, board) = board();
        let (command, argument) = split_command("set_startup:");
        assert_eq!(
            run(&board, command, argument),
            Err("set_startup needs a schedule".to_string())
        );
        assert!(registers.0.lock().is_empty());
    }

    #[test]
    fn set_read_and_clear_schedule() {
        let (registers, board) = board();
        assert_eq!(run(&board, "set_shutdown", Some("?? 22:00")), Ok(String::new()));
        assert_eq!(registers.0.lock().get(&(0x68, 12)), Some(&0x22));

        let answer = run(&board, "shutdown", None).unwrap();
        assert!(answer.ends_with(" ?? 22:00:00"), "{answer}");

        assert_eq!(run(&board, "clear_shutdown", None), Ok(String::new()));
        assert_eq!(run(&board, "shutdown", None), Ok("never".to_string()));
    }

    #[test]
    fn bad_input_is_an_error() {
        let (_, board) = board();
        assert!(run(&board, "set_startup", Some("tomorrow")).is_err());
        assert_eq!(run(&board, "", None), Err("No command given".to_string()));
        assert_eq!(run(&board, "reboot", None), Err("Unknown command: reboot".to_string()));
    }
}
