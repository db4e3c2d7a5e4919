//! Household agent command line.
//!
//! Reads one order per line from stdin and streams the answer token by
//! token. Scheduled orders fire into the same loop and print their answer
//! prefixed with the schedule name. Ctrl-C or end of input shuts the agent
//! down cleanly.

use majordomo_core::{Config, Orchestrator, ScheduledOrder};
use openai::OpenAi;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = match OpenAi::from_env() {
        Ok(client) => client,
        Err(_) => {
            eprintln!("Error: OPENAI_API_KEY environment variable not set.");
            eprintln!("Please set it in .env or with: export OPENAI_API_KEY=your_key_here");
            std::process::exit(1);
        }
    };

    let config = Config::load().await;
    let (orders_tx, mut orders_rx) = mpsc::channel::<ScheduledOrder>(16);
    let mut agent = Orchestrator::start(client, config, orders_tx).await?;

    println!("majordomo ready. Type an order, or Ctrl-D to quit.");
    print_prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let order = line.trim();
                if !order.is_empty() {
                    run_order(&mut agent, order, None).await;
                }
                print_prompt();
            }
            Some(order) = orders_rx.recv() => {
                println!();
                run_order(&mut agent, &order.prompt, Some(&order.name)).await;
                print_prompt();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\nShutting down.");
    agent.shutdown().await;
    Ok(())
}

/// Run one order, printing answer tokens as they stream in.
async fn run_order(agent: &mut Orchestrator, order: &str, schedule: Option<&str>) {
    if let Some(name) = schedule {
        println!("[{name}]");
    }

    let (tokens_tx, mut tokens_rx) = mpsc::channel::<String>(32);
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while let Some(token) = tokens_rx.recv().await {
            print!("{token}");
            let _ = std::io::stdout().flush();
            printed += token.len();
        }
        printed
    });

    let result = agent.process_order_stream(order, tokens_tx).await;
    let printed = printer.await.unwrap_or(0);

    match result {
        Ok(answer) => {
            // A fallback answer is synthesized, never streamed
            if printed == 0 {
                println!("{answer}");
            } else {
                println!();
            }
        }
        Err(e) => {
            error!(error = %e, "Order failed");
            println!("Sorry, something went wrong: {e}");
        }
    }
}

fn print_prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
