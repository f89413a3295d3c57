use mvcam::io::config::Roi;

/// One line of the tuning menu.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MenuCommand {
    Show,
    Roi(Roi),
    OffsetX(u32),
    OffsetY(u32),
    Width(u32),
    Height(u32),
    Fps(f64),
    /// `None` selects automatic gain
    Gain(Option<f64>),
    /// Exposure in milliseconds, `None` selects automatic exposure
    Exposure(Option<f64>),
    Save,
    Load,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum MenuError {
    #[error("empty command")]
    Empty,

    #[error("unknown command `{0}`, type `help` for the list")]
    Unknown(String),

    #[error("`{command}` expects {expected}")]
    Arguments {
        command: &'static str,
        expected: &'static str,
    },

    #[error("`{0}` is not a valid number")]
    InvalidNumber(String),
}

pub const HELP: &str = "\
commands:
  show                  print the current configuration
  roi X Y W H           set offset and size of the region of interest
  offset-x N | offset-y N | width N | height N
  fps V                 set the frame rate
  gain auto|V           automatic or manual gain
  exposure auto|MS      automatic or manual exposure in milliseconds
  save | load           write or apply the settings file
  quit";

/// Parse one menu line.
pub fn parse(line: &str) -> Result<MenuCommand, MenuError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(MenuError::Empty);
    };
    let args: Vec<&str> = words.collect();
    let head = head.to_ascii_lowercase();

    let command = match head.as_str() {
        "show" | "s" => no_args("show", &args, MenuCommand::Show)?,
        "save" => no_args("save", &args, MenuCommand::Save)?,
        "load" => no_args("load", &args, MenuCommand::Load)?,
        "help" | "?" => no_args("help", &args, MenuCommand::Help)?,
        "quit" | "q" | "exit" => no_args("quit", &args, MenuCommand::Quit)?,
        "roi" => match args.as_slice() {
            [x, y, w, h] => MenuCommand::Roi(Roi::new(
                integer(x)?,
                integer(y)?,
                integer(w)?,
                integer(h)?,
            )),
            _ => {
                return Err(MenuError::Arguments {
                    command: "roi",
                    expected: "four integers X Y W H",
                })
            }
        },
        "offset-x" => MenuCommand::OffsetX(integer(single("offset-x", &args)?)?),
        "offset-y" => MenuCommand::OffsetY(integer(single("offset-y", &args)?)?),
        "width" => MenuCommand::Width(integer(single("width", &args)?)?),
        "height" => MenuCommand::Height(integer(single("height", &args)?)?),
        "fps" => MenuCommand::Fps(number(single("fps", &args)?)?),
        "gain" => MenuCommand::Gain(auto_or_number(single("gain", &args)?)?),
        "exposure" => MenuCommand::Exposure(auto_or_number(single("exposure", &args)?)?),
        _ => return Err(MenuError::Unknown(head)),
    };
    Ok(command)
}

fn no_args(
    command: &'static str,
    args: &[&str],
    parsed: MenuCommand,
) -> Result<MenuCommand, MenuError> {
    if args.is_empty() {
        Ok(parsed)
    } else {
        Err(MenuError::Arguments {
            command,
            expected: "no arguments",
        })
    }
}

fn single<'a>(command: &'static str, args: &[&'a str]) -> Result<&'a str, MenuError> {
    match args {
        [value] => Ok(value),
        _ => Err(MenuError::Arguments {
            command,
            expected: "one value",
        }),
    }
}

fn integer(word: &str) -> Result<u32, MenuError> {
    word.parse()
        .map_err(|_| MenuError::InvalidNumber(word.to_string()))
}

fn number(word: &str) -> Result<f64, MenuError> {
    word.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MenuError::InvalidNumber(word.to_string()))
}

fn auto_or_number(word: &str) -> Result<Option<f64>, MenuError> {
    if word.eq_ignore_ascii_case("auto") {
        Ok(None)
    } else {
        number(word).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() -> Result<(), MenuError> {
        assert_eq!(parse("show")?, MenuCommand::Show);
        assert_eq!(parse("  QUIT ")?, MenuCommand::Quit);
        assert_eq!(
            parse("roi 16 32 640 480")?,
            MenuCommand::Roi(Roi::new(16, 32, 640, 480))
        );
        assert_eq!(parse("offset-y 8")?, MenuCommand::OffsetY(8));
        assert_eq!(parse("width 1024")?, MenuCommand::Width(1024));
        assert_eq!(parse("fps 42.5")?, MenuCommand::Fps(42.5));
        assert_eq!(parse("gain auto")?, MenuCommand::Gain(None));
        assert_eq!(parse("gain 2")?, MenuCommand::Gain(Some(2.0)));
        assert_eq!(parse("exposure 12.5")?, MenuCommand::Exposure(Some(12.5)));
        assert_eq!(parse("exposure Auto")?, MenuCommand::Exposure(None));
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("   "), Err(MenuError::Empty));
        assert_eq!(parse("zoom 2"), Err(MenuError::Unknown("zoom".to_string())));
        assert_eq!(
            parse("width -4"),
            Err(MenuError::InvalidNumber("-4".to_string()))
        );
        assert_eq!(parse("fps NaN"), Err(MenuError::InvalidNumber("NaN".to_string())));
        assert!(matches!(
            parse("roi 1 2 3"),
            Err(MenuError::Arguments { command: "roi", .. })
        ));
        assert!(matches!(
            parse("save now"),
            Err(MenuError::Arguments { command: "save", .. })
        ));
        assert!(matches!(
            parse("gain"),
            Err(MenuError::Arguments { command: "gain", .. })
        ));
    }
}
