use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use rustdis_client::{Client, Context, Error, Frame, Options, Request};

const URL: &str = "redis://127.0.0.1:6379";

#[derive(Parser, Debug)]
struct Args {
    /// The server to connect to
    #[arg(short, long, env = "REDIS_URL", default_value = URL)]
    url: String,

    /// Wrap the commands read from stdin in MULTI / EXEC
    #[arg(long)]
    multi: bool,

    /// The command to run. Without one, commands are read from stdin, one per line, and sent as
    /// a pipeline
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = Options::from_url(&args.url)?;
    if options.tls {
        return Err(Error::InvalidUri(String::from(
            "rediss:// needs a TLS transport, rustdis-cli only speaks plain TCP",
        )));
    }

    let stream = TcpStream::connect(options.address()).await?;
    let mut client = Client::connect(stream, &options).await?;
    let ctx = Context::background();

    if let Some(request) = parse_command(&args.command) {
        print_reply(client.dispatch(&ctx, request).await);
        return Ok(());
    }

    let mut requests = Vec::new();
    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        if let Some(request) = parse_command(&words) {
            requests.push(request);
        }
    }
    debug!(commands = requests.len(), multi = args.multi, "read commands from stdin");

    let mut pipeline = if args.multi {
        client.transaction()
    } else {
        client.pipeline()
    };
    let pending: Vec<_> = requests
        .into_iter()
        .map(|request| pipeline.enqueue(request))
        .collect();
    if let Err(err) = pipeline.exec(&ctx).await {
        error!(%err, "pipeline failed");
    }

    for command in pending {
        print_reply(command.result());
    }

    Ok(())
}

fn parse_command<T: AsRef<str>>(words: &[T]) -> Option<Request> {
    let (name, args) = words.split_first()?;
    Some(Request::new(name.as_ref()).args(args.iter().map(|arg| -> &str { arg.as_ref() })))
}

fn print_reply(reply: Result<Frame, Error>) {
    match reply {
        Ok(frame) => println!("{frame}"),
        Err(err) if err.is_nil() => println!("(nil)"),
        Err(err) => println!("(error) {err}"),
    }
}
