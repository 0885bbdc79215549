use dobiss::base::module_kind::ModuleKind;
use dobiss::drivers::simulator::simulator_bus::{SimBus, SimOptions};
use dobiss::{Bridge, BridgeConfig, OutputConfig, OutputController};
use dobiss_bridge as dobiss;
use std::sync::Arc;

extern crate clap;
use clap::{value_parser, Arg, Command};

async fn run_command(
    ctl: &mut OutputController,
    command: &str,
    brightness: Option<u8>,
    transition: Option<f32>,
) -> Result<String, String> {
    let res = match command {
        "on" => ctl.turn_on(brightness, transition).await.map(|c| format!("{:?}", c)),
        "off" => ctl.turn_off().await.map(|c| format!("{:?}", c)),
        "toggle" => ctl.toggle().await.map(|c| format!("{:?}", c)),
        "dim" => {
            if !ctl.id().kind().is_dimmable() {
                return Err(format!("Output {} can not be dimmed", ctl.id()));
            }
            let Some(brightness) = brightness else {
                return Err("dim needs a brightness".to_string());
            };
            ctl.turn_on(Some(brightness), transition)
                .await
                .map(|c| format!("{:?}", c))
        }
        "status" => ctl.refresh().await.map(|l| format!("{:?}", l)),
        _ => return Err(format!("Unknown command '{}'", command)),
    };
    res.map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let matches = Command::new("dobiss_ctl")
        .about("Control an output on a simulated Dobiss bus.")
        .arg(
            Arg::new("COMMAND")
                .required(true)
                .value_parser(["on", "off", "toggle", "dim", "status"])
                .help("What to do with the output"),
        )
        .arg(
            Arg::new("MODULE")
                .required(true)
                .value_parser(value_parser!(u8))
                .help("Module address, 1-82"),
        )
        .arg(
            Arg::new("OUTPUT")
                .required(true)
                .value_parser(value_parser!(u8))
                .help("Output index on the module"),
        )
        .arg(
            Arg::new("kind")
                .short('k')
                .long("kind")
                .value_parser(value_parser!(ModuleKind))
                .default_value("relay")
                .help("Module kind: relay, dimmer or 0-10v"),
        )
        .arg(
            Arg::new("brightness")
                .short('b')
                .long("brightness")
                .value_parser(value_parser!(u8))
                .help("Brightness 0-255 for on and dim"),
        )
        .arg(
            Arg::new("transition")
                .short('t')
                .long("transition")
                .value_parser(value_parser!(f32))
                .help("Transition time in seconds"),
        )
        .arg(
            Arg::new("max_level")
                .short('m')
                .long("max-level")
                .value_parser(value_parser!(u8))
                .default_value("100")
                .help("Highest dim level of the output, 0-100"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("JSON file with bridge timing"),
        )
        .get_matches();

    let command = matches.get_one::<String>("COMMAND").unwrap();
    let module = *matches.get_one::<u8>("MODULE").unwrap();
    let output = *matches.get_one::<u8>("OUTPUT").unwrap();
    let kind = *matches.get_one::<ModuleKind>("kind").unwrap();
    let brightness = matches.get_one::<u8>("brightness").copied();
    let transition = matches.get_one::<f32>("transition").copied();
    let max_level = *matches.get_one::<u8>("max_level").unwrap();

    let config = match matches.get_one::<String>("config") {
        Some(path) => match BridgeConfig::load(path).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to read configuration '{}': {}", path, e);
                return;
            }
        },
        None => BridgeConfig::default(),
    };

    let (bus, events) = SimBus::new(SimOptions::default());
    bus.add_module(module, kind);
    let bridge = Arc::new(Bridge::new(bus.clone(), config));
    bridge.spawn(events);

    let mut cfg = OutputConfig::new(module, kind, output);
    cfg.max_level = max_level;
    let mut ctl = match bridge.output(&cfg) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid output: {}", e);
            return;
        }
    };
    match run_command(&mut ctl, command, brightness, transition).await {
        Ok(r) => println!("Result: {}", r),
        Err(e) => eprintln!("Command failed: {}", e),
    }
    println!("State: {:?}", ctl.state());
}
