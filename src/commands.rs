pub mod registers {
    use crate::output;
    use crate::registers::{Kind, Language, RegisterIndex};

    /// Search and output the known heat pump registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only show registers whose name, label or address contains this.
        filter: Option<String>,
        /// Language of the register labels.
        #[arg(long, value_enum, default_value_t = Language::En)]
        language: Language,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the register list")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub address: u16,
        pub name: &'static str,
        pub kind: Kind,
        pub unit: Option<&'static str>,
        pub minimum: Option<f64>,
        pub maximum: Option<f64>,
        pub label: Option<&'static str>,
    }

    impl RegisterSchema {
        pub fn new(register: RegisterIndex, language: Language) -> Self {
            Self {
                address: register.address(),
                name: register.name(),
                kind: register.kind(),
                unit: register.unit(),
                minimum: register.minimum(),
                maximum: register.maximum(),
                label: register.label(language),
            }
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.name.to_uppercase().contains(&pattern)
                || self.label.is_some_and(|l| l.to_uppercase().contains(&pattern))
                || self.address.to_string().contains(&pattern)
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output()?;
        output.headers(vec!["Address", "Name", "Kind", "Unit", "Min", "Max", "Label"])?;
        for register in RegisterIndex::all() {
            let schema = RegisterSchema::new(register, args.language);
            if let Some(pattern) = &args.filter {
                if !schema.is_match(pattern) {
                    continue;
                }
            }
            output.record(
                || {
                    vec![
                        schema.address.to_string(),
                        schema.name.to_string(),
                        schema.kind.to_string(),
                        schema.unit.unwrap_or_default().to_string(),
                        schema.minimum.map(|v| v.to_string()).unwrap_or_default(),
                        schema.maximum.map(|v| v.to_string()).unwrap_or_default(),
                        schema.label.unwrap_or_default().to_string(),
                    ]
                },
                || &schema,
            )?;
        }
        output.finish()?;
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn filtering_matches_names_labels_and_addresses() {
            let register = RegisterIndex::from_name("out_temp").unwrap();
            let schema = RegisterSchema::new(register, Language::En);
            assert!(schema.is_match("out_"));
            assert!(schema.is_match("outside"));
            assert!(schema.is_match("5032"));
            assert!(!schema.is_match("water"));
        }
    }
}

pub mod watch {
    use futures::StreamExt as _;
    use std::io::Write as _;
    use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
    use tokio_stream::wrappers::BroadcastStream;

    use crate::registry::Registry;
    use crate::session::{self, Session};

    /// Connect to a heat pump and print its state as a JSON line whenever it
    /// refreshes.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        session: session::Args,
        /// Only print refreshes that changed at least one register.
        #[arg(long)]
        changes_only: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not establish the device session")]
        Session(#[source] session::Error),
        #[error("could not serialize the device state")]
        Serialize(#[source] serde_json::Error),
        #[error("could not write the device state to the terminal")]
        WriteStdout(#[source] std::io::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(run_inner(args))
    }

    async fn run_inner(args: Args) -> Result<(), Error> {
        let node = args.session.node.clone();
        let changes_only = args.changes_only;
        let session = Session::start(args.session).await.map_err(Error::Session)?;
        let mut refreshes = BroadcastStream::new(session.subscribe());
        let mut registry = Registry::new();
        registry.add(node.clone(), session);

        loop {
            tokio::select! {
                refresh = refreshes.next() => match refresh {
                    None => break,
                    Some(Err(BroadcastStreamRecvError::Lagged(count))) => {
                        tracing::warn!(count, "dropped refresh notifications");
                    }
                    Some(Ok(refresh)) => {
                        if changes_only && refresh.changed == 0 {
                            continue;
                        }
                        let session = registry.get(&node).expect("registered above");
                        print_state(session)?;
                    }
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        if let Some(session) = registry.remove(&node) {
            session.stop().await;
        }
        Ok(())
    }

    fn print_state(session: &Session) -> Result<(), Error> {
        let mut record = serde_json::Map::new();
        for (register, value) in session.state().snapshot() {
            let value = serde_json::to_value(&value).map_err(Error::Serialize)?;
            record.insert(register.name().to_string(), value);
        }
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", serde_json::Value::Object(record)).map_err(Error::WriteStdout)
    }
}

pub mod write {
    use crate::registers::{self, Kind, RegisterIndex};
    use crate::session::{self, Session};
    use crate::timeprogram::TimeProgram;
    use crate::values::RegisterValue;

    /// Write a value to one register of the heat pump.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        session: session::Args,
        /// Register name, as shown by the `registers` command.
        register: String,
        /// `on`/`off` for switches, a number for temperatures and selects,
        /// or a JSON schedule document for time programs.
        value: String,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("there is no register named {0:?}")]
        UnknownRegister(String),
        #[error("register {0} is read-only")]
        ReadOnly(&'static str),
        #[error("{0:?} is not a switch value, expected `on` or `off`")]
        BadSwitchValue(String),
        #[error("{0:?} is not a number")]
        BadNumber(String),
        #[error("option {value} of register {register} is outside {start}..={last}")]
        BadSelectOption { register: &'static str, value: i64, start: i64, last: i64 },
        #[error("could not parse the schedule document")]
        BadSchedule(#[source] serde_json::Error),
        #[error("could not establish the device session")]
        Session(#[source] session::Error),
        #[error("could not send the write command")]
        Send(#[source] session::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(run_inner(args))
    }

    async fn run_inner(args: Args) -> Result<(), Error> {
        let register = RegisterIndex::from_name(&args.register)
            .ok_or_else(|| Error::UnknownRegister(args.register.clone()))?;
        let value = parse_value(register, &args.value)?;
        let session = Session::start(args.session).await.map_err(Error::Session)?;
        let outcome = session
            .send_register(register.name(), &value)
            .await
            .map_err(Error::Send);
        session.stop().await;
        outcome
    }

    fn parse_value(register: RegisterIndex, raw: &str) -> Result<RegisterValue, Error> {
        match register.kind() {
            Kind::Switch | Kind::Action => match raw {
                "on" | "true" | "1" => Ok(RegisterValue::Bool(true)),
                "off" | "false" | "0" => Ok(RegisterValue::Bool(false)),
                _ => Err(Error::BadSwitchValue(raw.to_string())),
            },
            Kind::TemperatureInput => {
                let number = raw.parse().map_err(|_| Error::BadNumber(raw.to_string()))?;
                Ok(RegisterValue::Number(number))
            }
            Kind::Select => {
                let value: i64 = raw.parse().map_err(|_| Error::BadNumber(raw.to_string()))?;
                if let Some(options) = registers::select_options(register.name()) {
                    let start = i64::from(options.start);
                    let last = start + i64::from(options.count) - 1;
                    if value < start || value > last {
                        return Err(Error::BadSelectOption {
                            register: register.name(),
                            value,
                            start,
                            last,
                        });
                    }
                }
                Ok(RegisterValue::Number(value as f64))
            }
            Kind::TimeProgram => {
                let program: TimeProgram =
                    serde_json::from_str(raw).map_err(Error::BadSchedule)?;
                Ok(RegisterValue::TimeProgram(program))
            }
            Kind::Temperature
            | Kind::Power
            | Kind::Energy
            | Kind::Counter
            | Kind::Mode
            | Kind::GeneratedStatus => Err(Error::ReadOnly(register.name())),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn register(name: &str) -> RegisterIndex {
            RegisterIndex::from_name(name).unwrap()
        }

        #[test]
        fn switch_values() {
            let party = register("party_mode");
            assert_eq!(parse_value(party, "on").unwrap(), RegisterValue::Bool(true));
            assert_eq!(parse_value(party, "off").unwrap(), RegisterValue::Bool(false));
            assert!(matches!(
                parse_value(party, "maybe"),
                Err(Error::BadSwitchValue(_))
            ));
        }

        #[test]
        fn select_options_are_validated() {
            let main_mode = register("main_mode");
            assert_eq!(
                parse_value(main_mode, "2").unwrap(),
                RegisterValue::Number(2.0)
            );
            assert!(matches!(
                parse_value(main_mode, "0"),
                Err(Error::BadSelectOption { .. })
            ));
            assert!(matches!(
                parse_value(main_mode, "5"),
                Err(Error::BadSelectOption { .. })
            ));
            let dhw = register("dhw_opmode");
            assert_eq!(parse_value(dhw, "0").unwrap(), RegisterValue::Number(0.0));
            assert!(matches!(
                parse_value(dhw, "4"),
                Err(Error::BadSelectOption { .. })
            ));
        }

        #[test]
        fn schedules_parse_from_json() {
            let heating = register("heating_timeprogram");
            let document = r#"{"mon": {"timeslots": [{"start": "06:00", "stop": "08:00", "on": true}]}}"#;
            let RegisterValue::TimeProgram(program) = parse_value(heating, document).unwrap()
            else {
                panic!("expected a schedule");
            };
            assert_eq!(program.mon.timeslots.len(), 1);
            assert!(program.tue.timeslots.is_empty());
        }

        #[test]
        fn sensors_are_read_only() {
            assert!(matches!(
                parse_value(register("out_temp"), "20"),
                Err(Error::ReadOnly(_))
            ));
        }
    }
}

pub mod timeprogram {
    use crate::timeprogram;

    /// Convert weekly schedules between the wire blob and JSON.
    #[derive(clap::Parser)]
    pub struct Args {
        #[command(subcommand)]
        direction: Direction,
    }

    #[derive(clap::Subcommand)]
    enum Direction {
        /// Decode a 168-digit blob into a schedule document.
        Decode {
            /// The blob, as reported by a schedule register.
            blob: String,
        },
        /// Encode a schedule document, read from the standard input, into a
        /// blob.
        Encode,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not decode the blob")]
        Decode(#[source] timeprogram::DecodeError),
        #[error("could not read the schedule document from the standard input")]
        ReadStdin(#[source] std::io::Error),
        #[error("could not parse the schedule document")]
        ParseSchedule(#[source] serde_json::Error),
        #[error("could not write to the terminal")]
        WriteStdout(#[source] std::io::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        use std::io::Write as _;
        let mut stdout = std::io::stdout().lock();
        match args.direction {
            Direction::Decode { blob } => {
                let program = timeprogram::decode(&blob).map_err(Error::Decode)?;
                let document = serde_json::to_string_pretty(&program)
                    .expect("a schedule always serializes");
                writeln!(stdout, "{document}").map_err(Error::WriteStdout)
            }
            Direction::Encode => {
                let document =
                    std::io::read_to_string(std::io::stdin()).map_err(Error::ReadStdin)?;
                let program = serde_json::from_str(&document).map_err(Error::ParseSchedule)?;
                writeln!(stdout, "{}", timeprogram::encode(&program)).map_err(Error::WriteStdout)
            }
        }
    }
}
