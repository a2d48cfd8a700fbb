//! Entry point for the shd daemon.
//!
//! Parses the command line, loads the configuration and wires the reactor,
//! modem link and light controller together. The reactor loop never returns;
//! the process ends from the shutdown signal handler or, for the `on`/`off`
//! commands, from the command's completion.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::rc::Rc;

use shd::args::{self, CliAction, ParsedArgs};
use shd::config::{self, Config};
use shd::constants::{EXIT_FAILURE, EXIT_SUCCESS};
use shd::io::{BufferedConnection, SerialFd};
use shd::lights::LightController;
use shd::logger::{ConsoleLogger, Log, Logger, LoggerGuard};
use shd::plm::{DeviceAddress, PlmConnection, PlmEndpoint, Response};
use shd::reactor::Reactor;
use shd::signals::SignalWatcher;
use shd::time_source::{RealTimeSource, TimeSource};
use shd::{log_block_start, log_debug, log_decorated, log_end, log_error_exit, log_indented, log_pipe, log_version};

/// Everything between the reactor and the powerline modem.
struct ModemStack {
    reactor: Rc<Reactor>,
    clock: Rc<dyn TimeSource>,
    logger: Rc<dyn Logger>,
    endpoint: Rc<PlmEndpoint>,
}

impl ModemStack {
    fn new(config: &Config, debug_enabled: bool) -> Self {
        let clock: Rc<dyn TimeSource> = Rc::new(RealTimeSource);
        let logger: Rc<dyn Logger> = Rc::new(ConsoleLogger::new(debug_enabled));
        let reactor = Reactor::new(clock.clone(), logger.clone());

        let serial = SerialFd::new(config.serial_device());
        let conn = BufferedConnection::new(Box::new(serial), reactor.clone(), reactor.clone(), logger.clone());
        let plm = PlmConnection::new(conn, reactor.clone(), logger.clone());
        let endpoint = PlmEndpoint::new(
            plm,
            reactor.clone(),
            reactor.clone(),
            logger.clone(),
            config.endpoint_config(),
        );

        Self {
            reactor,
            clock,
            logger,
            endpoint,
        }
    }
}

fn load_config(config_path: Option<String>) -> Result<(Config, std::path::PathBuf)> {
    if let Some(path) = config_path {
        config::set_config_path(path)?;
    }
    let path = config::get_config_path()?;
    let config = Config::load_from_path(&path)?;
    Ok((config, path))
}

fn run_daemon(debug_enabled: bool, config_path: Option<String>, log_file: Option<String>) -> Result<()> {
    log_version!();
    let (config, path) = load_config(config_path)?;
    let addresses = config.light_addresses()?;
    config.log_config(&path);

    if debug_enabled {
        log_pipe!();
        log_debug!("Debug mode enabled, staying in the foreground");
    } else {
        log_block_start!("Detaching from the terminal");
        // Threads do not survive the fork, so file logging starts afterwards.
        nix::unistd::daemon(true, false).context("Failed to daemonize")?;
    }

    let guard: Rc<RefCell<Option<LoggerGuard>>> = Rc::new(RefCell::new(None));
    if let Some(file) = log_file {
        *guard.borrow_mut() = Some(Log::start_file_logging(file).context("Failed to start file logging")?);
        log_version!();
    }

    let stack = ModemStack::new(&config, debug_enabled);
    let controller = LightController::new(
        stack.endpoint.clone(),
        stack.reactor.clone(),
        stack.clock.clone(),
        stack.logger.clone(),
        config.light_schedule(),
        &addresses,
    );

    let _signals = {
        let controller = controller.clone();
        let guard = guard.clone();
        SignalWatcher::install(stack.reactor.clone(), move || {
            controller.stop();
            log_block_start!("Received shutdown signal, switching off the modem link");
            log_end!();
            guard.borrow_mut().take();
            std::process::exit(EXIT_SUCCESS);
        })?
    };

    log_block_start!(
        "Watching {} light(s) on {}",
        addresses.len(),
        config.serial_device()
    );
    controller.start();
    stack.reactor.run_loop()
}

fn run_switch(on: bool, address: String, debug_enabled: bool, config_path: Option<String>) -> Result<()> {
    let address: DeviceAddress = address
        .parse()
        .with_context(|| format!("Invalid device address '{address}'"))?;
    let (config, _) = load_config(config_path)?;

    let stack = ModemStack::new(&config, debug_enabled);
    let _signals = {
        let endpoint = stack.endpoint.clone();
        SignalWatcher::install(stack.reactor.clone(), move || {
            endpoint.stop();
            std::process::exit(EXIT_FAILURE);
        })?
    };

    let done = move |response: Response| {
        if response == Response::Ok {
            log_decorated!("{} switched {}", address, if on { "on" } else { "off" });
            log_end!();
            std::process::exit(EXIT_SUCCESS);
        }
        log_pipe!();
        log_error_exit!("{} did not answer: {:?}", address, response);
        log_indented!("Check the modem on {}", config.serial_device());
        log_end!();
        std::process::exit(EXIT_FAILURE);
    };

    stack.endpoint.start();
    if on {
        stack.endpoint.send_light_on(address, done);
    } else {
        stack.endpoint.send_light_off(address, done);
    }
    stack.reactor.run_loop()
}

fn main() -> Result<()> {
    let parsed_args = ParsedArgs::from_env();

    let result = match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            Ok(())
        }
        CliAction::ShowHelp => {
            args::display_help();
            Ok(())
        }
        CliAction::ShowHelpDueToError => {
            args::display_help();
            std::process::exit(EXIT_FAILURE);
        }
        CliAction::Run {
            debug_enabled,
            config_path,
            log_file,
        } => run_daemon(debug_enabled, config_path, log_file),
        CliAction::Switch {
            on,
            address,
            debug_enabled,
            config_path,
        } => run_switch(on, address, debug_enabled, config_path),
    };

    if let Err(err) = result {
        log_pipe!();
        log_error_exit!("{:#}", err);
        log_end!();
        std::process::exit(EXIT_FAILURE);
    }
    Ok(())
}
