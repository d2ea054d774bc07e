//! Line-oriented terminal sessions for bidders and auctioneers.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::common::AuctionEvent;
use crate::error::{AuctionError, AuctionResult};
use crate::network::{Auctioneer, Bidder, ClientAgent, Participant};

const BIDDER_HELP: &str = "commands: list | bid <lot> <amount> | reclaim <lot> | history | quit";
const AUCTIONEER_HELP: &str = "commands: list | add <seller> <lot> <price> <increment> <duration> <description...> | start | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Bid {
        lot_id: String,
        amount: f64,
    },
    Reclaim {
        lot_id: String,
    },
    History,
    Add {
        seller: String,
        lot_id: String,
        starting_price: f64,
        increment: u32,
        duration_secs: u32,
        description: String,
    },
    Start,
    Help,
    Quit,
}

fn arg<'a>(words: &mut impl Iterator<Item = &'a str>, name: &str) -> AuctionResult<&'a str> {
    words
        .next()
        .ok_or_else(|| AuctionError::Validation(format!("missing <{name}>")))
}

fn number<T: std::str::FromStr>(raw: &str, name: &str) -> AuctionResult<T> {
    raw.parse()
        .map_err(|_| AuctionError::Validation(format!("<{name}> must be a number, got `{raw}`")))
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> AuctionResult<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" => Command::List,
        "bid" => Command::Bid {
            lot_id: arg(&mut words, "lot")?.to_string(),
            amount: number(arg(&mut words, "amount")?, "amount")?,
        },
        "reclaim" => Command::Reclaim {
            lot_id: arg(&mut words, "lot")?.to_string(),
        },
        "history" => Command::History,
        "add" => Command::Add {
            seller: arg(&mut words, "seller")?.to_string(),
            lot_id: arg(&mut words, "lot")?.to_string(),
            starting_price: number(arg(&mut words, "price")?, "price")?,
            increment: number(arg(&mut words, "increment")?, "increment")?,
            duration_secs: number(arg(&mut words, "duration")?, "duration")?,
            description: words.collect::<Vec<_>>().join(" "),
        },
        "start" => Command::Start,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return Err(AuctionError::Validation(format!("unknown command `{other}`")));
        }
    };
    Ok(Some(command))
}

pub enum Session {
    Bidder(Bidder),
    Auctioneer(Auctioneer),
}

impl Session {
    fn agent(&self) -> &ClientAgent {
        match self {
            Self::Bidder(bidder) => bidder.agent(),
            Self::Auctioneer(auctioneer) => auctioneer.agent(),
        }
    }

    fn help(&self) -> &'static str {
        match self {
            Self::Bidder(_) => BIDDER_HELP,
            Self::Auctioneer(_) => AUCTIONEER_HELP,
        }
    }

    async fn execute(&self, command: Command) -> AuctionResult<()> {
        match (self, command) {
            (_, Command::List) => {
                let lots = match self {
                    Self::Bidder(bidder) => bidder.list_lots().await?,
                    Self::Auctioneer(auctioneer) => auctioneer.list_lots().await?,
                };
                if lots.is_empty() {
                    println!("No open lots.");
                }
                for lot in lots {
                    println!("{lot}");
                }
            }
            (Self::Bidder(bidder), Command::Bid { lot_id, amount }) => {
                let lot = bidder.place_bid(&lot_id, amount).await?;
                println!("Bid accepted: {lot}");
            }
            (Self::Auctioneer(auctioneer), Command::Bid { lot_id, amount }) => {
                auctioneer.place_bid(&lot_id, amount).await?;
            }
            (Self::Bidder(bidder), Command::Reclaim { lot_id }) => {
                println!("{}", bidder.reclaim(&lot_id).await?);
            }
            (Self::Bidder(bidder), Command::History) => {
                for entry in bidder.history().await? {
                    println!("{entry}");
                }
            }
            (
                Self::Auctioneer(auctioneer),
                Command::Add {
                    seller,
                    lot_id,
                    starting_price,
                    increment,
                    duration_secs,
                    description,
                },
            ) => {
                let lot = auctioneer
                    .add_lot(
                        &seller,
                        &lot_id,
                        &description,
                        starting_price,
                        increment,
                        duration_secs,
                    )
                    .await?;
                println!("Listed: {lot}");
            }
            (Self::Auctioneer(auctioneer), Command::Start) => {
                let at = auctioneer.start_auction().await?;
                println!("Auction started at {}", at.format("%H:%M:%S"));
            }
            (Self::Auctioneer(_), Command::Reclaim { .. } | Command::History) => {
                return Err(AuctionError::RoleViolation {
                    role: Auctioneer::ROLE,
                    action: "query bids",
                });
            }
            (Self::Bidder(_), Command::Add { .. } | Command::Start) => {
                return Err(AuctionError::RoleViolation {
                    role: Bidder::ROLE,
                    action: "manage the auction",
                });
            }
            (_, Command::Help | Command::Quit) => println!("{}", self.help()),
        }
        Ok(())
    }
}

/// Reads commands from stdin until `quit` or end of input, printing
/// notifications as they arrive.
pub async fn run(session: Session) -> AuctionResult<()> {
    let print = |event: AuctionEvent| println!("{event}");
    let updates = session.agent().on_lot_update(print);
    let starts = session.agent().on_auction_start(print);

    println!("{}", session.help());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = session.execute(command).await {
            log::debug!("Command failed: {err:?}");
            println!("Error: {err}");
        }
    }

    session.agent().close();
    updates.abort();
    starts.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bid_and_add() {
        assert_eq!(
            parse_command("bid AB-1 1250.5").unwrap(),
            Some(Command::Bid {
                lot_id: "AB-1".to_string(),
                amount: 1250.5
            })
        );
        assert_eq!(
            parse_command("add s@example.com AB-2 900 25 120 red coupe, low mileage").unwrap(),
            Some(Command::Add {
                seller: "s@example.com".to_string(),
                lot_id: "AB-2".to_string(),
                starting_price: 900.0,
                increment: 25,
                duration_secs: 120,
                description: "red coupe, low mileage".to_string(),
            })
        );
    }

    #[test]
    fn blank_and_bad_lines() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command("bid AB-1").is_err());
        assert!(parse_command("bid AB-1 lots").is_err());
        assert!(parse_command("dance").is_err());
    }
}
