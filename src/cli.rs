use crate::{Result, WbxmlError, XmlDumper};
use clap::{Arg, Command};

pub struct Cli;

impl Cli {
    pub fn build_command() -> Command {
        Command::new("wbxml2xml")
            .about("Converts WBXML (WAP Binary XML) to human-readable XML")
            .long_about("Converts WBXML (WAP Binary XML) documents to a human-readable XML dump.\n\nCoded tags and attributes are rendered as hex placeholders, opaque payloads as base64. When invoked with the '-i' argument, the output of a successful conversion will overwrite the original input file. Input can be '-' to use stdin, and output can be '-' to use stdout.")
            .arg(
                Arg::new("in-place")
                    .short('i')
                    .long("in-place")
                    .help("Overwrite input file with converted output")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("keep-going")
                    .long("keep-going")
                    .help("Stop at the first malformed token and emit what decoded so far")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("input")
                    .help("Input file path (use '-' for stdin)")
                    .required(true)
                    .index(1),
            )
            .arg(
                Arg::new("output")
                    .help("Output file path (use '-' for stdout)")
                    .index(2),
            )
    }

    pub fn run() -> Result<()> {
        let matches = Self::build_command().get_matches();
        Self::run_with_matches(matches)
    }

    pub fn run_with_matches(matches: clap::ArgMatches) -> Result<()> {
        let input_path = matches.get_one::<String>("input").unwrap();
        let output_path = matches.get_one::<String>("output");
        let in_place = matches.get_flag("in-place");
        let keep_going = matches.get_flag("keep-going");

        if in_place && input_path == "-" {
            return Err(WbxmlError::Usage(
                "Cannot use -i option with stdin input".to_string(),
            ));
        }

        let output_path = match output_path {
            Some(path) => path.clone(),
            None => {
                if in_place {
                    input_path.clone()
                } else {
                    "-".to_string()
                }
            }
        };

        let dumper = XmlDumper::new().keep_going(keep_going);
        match (input_path.as_str(), output_path.as_str()) {
            ("-", "-") => dumper.convert_stdin_stdout(),
            ("-", output) => dumper.convert_stdin_to_file(output),
            (input, "-") => dumper.convert_file_to_stdout(input),
            (input, output) => dumper.convert_file(input, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        let cmd = Cli::build_command();
        assert_eq!(cmd.get_name(), "wbxml2xml");
    }

    #[test]
    fn test_in_place_with_stdin_error() {
        let matches = Cli::build_command()
            .try_get_matches_from(vec!["wbxml2xml", "-i", "-"])
            .unwrap();

        let result = Cli::run_with_matches(matches);
        assert!(result.is_err());

        if let Err(WbxmlError::Usage(msg)) = result {
            assert!(msg.contains("Cannot use -i option with stdin input"));
        } else {
            panic!("Expected Usage error");
        }
    }

    #[test]
    fn test_keep_going_flag_parses() {
        let matches = Cli::build_command()
            .try_get_matches_from(vec!["wbxml2xml", "--keep-going", "in.wbxml", "out.xml"])
            .unwrap();
        assert!(matches.get_flag("keep-going"));
    }
}
