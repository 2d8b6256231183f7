use flutterbuild::{Error, cli};

fn main() {
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {}", e);

        // Print the error chain
        let mut source = e.source();
        while let Some(err) = source {
            eprintln!("Caused by: {}", err);
            source = err.source();
        }

        if let Some(hint) = e.downcast_ref::<Error>().and_then(Error::hint) {
            eprintln!("Hint: {}", hint);
        }

        std::process::exit(1);
    }
}
