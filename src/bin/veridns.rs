use std::env;
use std::fs;
use std::process::exit;
use std::sync::Arc;

use getopts::Options;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use veridns::dns::exchange::TlsExchanger;
use veridns::dns::peer::PeerRegistry;
use veridns::dns::resolve::ChainResolver;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options] DOMAIN", program);
    print!("{}", opts.usage(&brief));
}

/// Look up a single domain through the pinned, DNSSEC-enforcing resolver
/// and print the address.
fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "c",
        "peers",
        "YAML file listing the trusted peers (default: built-in registry)",
        "FILE",
    );
    opts.optflag("v", "verbose", "enable debug logging");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };

    if opt_matches.opt_present("h") || opt_matches.free.len() != 1 {
        print_usage(&program, opts);
        exit(if opt_matches.opt_present("h") { 0 } else { 1 });
    }

    let level = if opt_matches.opt_present("v") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {}", e);
        exit(1);
    }

    let registry = match opt_matches.opt_str("c") {
        Some(path) => {
            let data = match fs::read_to_string(&path) {
                Ok(data) => data,
                Err(e) => {
                    eprintln!("Failed to read {}: {}", path, e);
                    exit(1);
                }
            };
            match PeerRegistry::from_yaml(&data) {
                Ok(registry) => registry,
                Err(e) => {
                    eprintln!("Failed to load peers from {}: {}", path, e);
                    exit(1);
                }
            }
        }
        None => PeerRegistry::well_known(),
    };

    let domain = &opt_matches.free[0];
    let resolver = ChainResolver::new(TlsExchanger::default(), Arc::new(registry));

    match resolver.resolve_any(domain) {
        Ok(addr) => println!("{}", addr),
        Err(e) => {
            eprintln!("Failed to resolve {}: {}", domain, e);
            exit(1);
        }
    }
}
