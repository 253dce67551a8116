use crate::color::ColorChannel;
use crate::AppState;
use log::{error, info, warn};
use std::io::BufRead;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

pub const HELP: &str = "commands:
  port <name>               switch the serial port
  ports                     list configured and detected ports
  red|green|blue <0-255>    set a color channel
  send                      send the current color
  activate <name>           run a configured action
  status                    show readings and link status
  quit                      stop the monitor";

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Port(String),
    Ports,
    Channel(ColorChannel, f64),
    Send,
    Activate(String),
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some(command) => command.to_lowercase(),
            None => return Result::Ok(None),
        };
        let argument = words.next();
        if let Some(extra) = words.next() {
            return Result::Err(format!("unexpected argument: {}", extra));
        }
        let command = match (command.as_str(), argument) {
            ("port", Some(port)) => ConsoleCommand::Port(port.to_string()),
            ("ports", None) => ConsoleCommand::Ports,
            ("send", None) => ConsoleCommand::Send,
            ("activate", Some(name)) => ConsoleCommand::Activate(name.to_string()),
            ("status", None) => ConsoleCommand::Status,
            ("help", None) => ConsoleCommand::Help,
            ("quit", None) | ("exit", None) => ConsoleCommand::Quit,
            (channel @ ("red" | "green" | "blue"), Some(value)) => {
                let value = value
                    .parse::<f64>()
                    .map_err(|err| format!("invalid {} value: {} ({})", channel, value, err))?;
                ConsoleCommand::Channel(channel.parse()?, value)
            }
            _ => return Result::Err(format!("invalid command: {} (try help)", line.trim())),
        };
        return Result::Ok(Some(command));
    }
}

/// Reads commands until `quit` or end of input. `quit` is reported on
/// `shutdown_tx`; end of input only ends the console.
pub fn run_console(app_state: &Arc<Mutex<AppState>>, input: impl BufRead, shutdown_tx: &Sender<()>) {
    for line in input.lines() {
        let line = match line {
            Result::Ok(line) => line,
            Result::Err(err) => {
                error!("failed to read console input: {}", err);
                break;
            }
        };
        let command = match ConsoleCommand::parse(&line) {
            Result::Ok(Some(command)) => command,
            Result::Ok(None) => continue,
            Result::Err(err) => {
                println!("{}", err);
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            let _ = shutdown_tx.send(());
            return;
        }
        match execute(app_state, command) {
            Result::Ok(output) => println!("{}", output),
            Result::Err(err) => {
                warn!("{}", err);
                println!("error: {}", err);
            }
        }
    }
    info!("console input closed");
}

pub fn execute(app_state: &Arc<Mutex<AppState>>, command: ConsoleCommand) -> Result<String, String> {
    let mut app_state = app_state
        .lock()
        .map_err(|err| format!("failed to lock {}", err))?;
    return match command {
        ConsoleCommand::Port(port) => {
            app_state.change_port(&port)?;
            let status = app_state.status()?;
            Result::Ok(format!("{}: {}", status.port, status.dashboard.link_status))
        }
        ConsoleCommand::Ports => Result::Ok(list_ports(&app_state.monitor_config.ports)),
        ConsoleCommand::Channel(channel, value) => {
            let text = app_state.set_color_channel(channel, value);
            Result::Ok(format!("{} {}", channel, text))
        }
        ConsoleCommand::Send => {
            app_state.send_color()?;
            let command = app_state.color.command();
            Result::Ok(format!("sent {} {} {}", command.red, command.green, command.blue))
        }
        ConsoleCommand::Activate(name) => {
            app_state.activate(&name)?;
            Result::Ok(format!("activated {}", name))
        }
        ConsoleCommand::Status => {
            let status = app_state.status()?;
            Result::Ok(format!(
                "port {} ({})\nhumidity {}\ntemperature {}\ncolor {} {} {}\nreadings {}{}",
                status.port,
                status.dashboard.link_status,
                status.dashboard.humidity,
                status.dashboard.temperature,
                status.color.red,
                status.color.green,
                status.color.blue,
                status.dashboard.readings,
                match &status.dashboard.last_error {
                    Some(err) => format!("\nlast error: {}", err),
                    None => String::new(),
                }
            ))
        }
        ConsoleCommand::Help => Result::Ok(HELP.to_string()),
        ConsoleCommand::Quit => Result::Ok(String::new()),
    };
}

fn list_ports(configured: &[String]) -> String {
    let mut output = format!("configured: {}", configured.join(", "));
    match serialport::available_ports() {
        Result::Ok(ports) => {
            let names: Vec<String> = ports.into_iter().map(|port| port.port_name).collect();
            output += &format!("\ndetected: {}", names.join(", "));
        }
        Result::Err(err) => warn!("failed to list serial ports: {}", err),
    }
    return output;
}
