use crate::annotation::codec::{self, CodecError};
use crate::annotation::AnnotationUpdate;
use crate::segmentation::{BoxCoords, Point};
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("bad preview arguments: {0}")]
    Arguments(String),

    #[error("{flag}: {source}")]
    Codec {
        flag: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("render needs an output folder")]
    MissingRenderPath,
}

/// One line of the control protocol.
#[derive(Debug)]
pub enum Command {
    Preview(PreviewRequest),
    Render(PathBuf),
    Quit,
    /// Anything unrecognised; ignored by the driver.
    Other(String),
}

#[derive(Debug)]
pub struct PreviewRequest {
    pub frame: usize,
    pub update: AnnotationUpdate,
    /// Overrides the session's preview path for this command
    pub output: Option<PathBuf>,
}

/// Arguments after `preview=`, spelled like the standalone mask script's flags.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true, disable_version_flag = true)]
struct PreviewArgs {
    /// Points per frame, `0=200,250,300,255;100=10,50`
    #[arg(short = 'P', long = "point_coordinates")]
    points: Option<String>,

    /// Point labels per frame, 1 include / 0 exclude, `0=1,0;100=1`
    #[arg(short = 'L', long = "labels")]
    labels: Option<String>,

    /// Boxes per frame, `0=10,20,150,255`
    #[arg(short = 'B', long = "box_coordinates")]
    boxes: Option<String>,

    /// Frame to predict on
    #[arg(short = 'F', long = "preview_frame")]
    frame: usize,

    #[arg(short = 'O', long = "output")]
    output: Option<PathBuf>,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end();

        if let Some(args) = line.strip_prefix("preview=") {
            return parse_preview(args).map(Command::Preview);
        }
        if let Some(path) = line.strip_prefix("render=") {
            let path = path.trim();
            if path.is_empty() {
                return Err(CommandError::MissingRenderPath);
            }
            return Ok(Command::Render(PathBuf::from(path)));
        }
        match line {
            "q" | "quit" => Ok(Command::Quit),
            other => Ok(Command::Other(other.to_string())),
        }
    }
}

fn parse_preview(args: &str) -> Result<PreviewRequest, CommandError> {
    let args = PreviewArgs::try_parse_from(args.split_whitespace()).map_err(|e| {
        let message = e.to_string();
        let first = message.lines().next().unwrap_or_default();
        CommandError::Arguments(first.trim_start_matches("error: ").to_string())
    })?;

    let mut update = AnnotationUpdate::default();
    if let Some(points) = &args.points {
        update.points = codec::decode::<2>(points)
            .map_err(flag_error("-P"))?
            .into_iter()
            .map(|(frame, tuples)| (frame, tuples.into_iter().map(Point::from).collect()))
            .collect();
    }
    if let Some(labels) = &args.labels {
        update.labels = codec::decode::<1>(labels)
            .map_err(flag_error("-L"))?
            .into_iter()
            .map(|(frame, tuples)| (frame, tuples.into_iter().map(|[label]| label).collect()))
            .collect();
    }
    if let Some(boxes) = &args.boxes {
        update.boxes = codec::decode::<4>(boxes)
            .map_err(flag_error("-B"))?
            .into_iter()
            .map(|(frame, tuples)| (frame, tuples.into_iter().map(BoxCoords::from).collect()))
            .collect();
    }

    Ok(PreviewRequest {
        frame: args.frame,
        update,
        output: args.output,
    })
}

fn flag_error(flag: &'static str) -> impl Fn(CodecError) -> CommandError {
    move |source| CommandError::Codec { flag, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(line: &str) -> PreviewRequest {
        match Command::parse(line).unwrap() {
            Command::Preview(request) => request,
            other => panic!("expected preview, got {:?}", other),
        }
    }

    #[test]
    fn parses_preview_arguments() {
        let request = preview("preview=-P 0=10,10,20,20 -L 0=1,0 -B 5=1,2,3,4 -F 0");

        assert_eq!(request.frame, 0);
        assert_eq!(
            request.update.points,
            vec![(0, vec![Point { x: 10, y: 10 }, Point { x: 20, y: 20 }])]
        );
        assert_eq!(request.update.labels, vec![(0, vec![1, 0])]);
        assert_eq!(
            request.update.boxes,
            vec![(
                5,
                vec![BoxCoords {
                    x0: 1,
                    y0: 2,
                    x1: 3,
                    y1: 4
                }]
            )]
        );
        assert!(request.output.is_none());
    }

    #[test]
    fn preview_accepts_long_flags_and_output() {
        let request = preview("preview=--box_coordinates 2=0,0,5,5 --preview_frame 2 -O /tmp/p.png  ");
        assert_eq!(request.frame, 2);
        assert_eq!(request.output, Some(PathBuf::from("/tmp/p.png")));
        assert!(request.update.points.is_empty());
    }

    #[test]
    fn preview_requires_a_frame() {
        assert!(matches!(
            Command::parse("preview=-P 0=1,1 -L 0=1"),
            Err(CommandError::Arguments(_))
        ));
    }

    #[test]
    fn codec_errors_name_the_flag() {
        let err = Command::parse("preview=-P 0=1,2,3 -L 0=1 -F 0").unwrap_err();
        assert!(matches!(err, CommandError::Codec { flag: "-P", .. }));
        assert!(err.to_string().starts_with("-P: frame 0"));
    }

    #[test]
    fn empty_values_are_rejected() {
        let err = Command::parse("preview=-P 0=10,,20 -L 0=1 -F 0").unwrap_err();
        assert!(matches!(
            err,
            CommandError::Codec {
                flag: "-P",
                source: CodecError::EmptyValue(0)
            }
        ));
    }

    #[test]
    fn parses_render_and_quit() {
        assert!(matches!(
            Command::parse("render=/tmp/out\n").unwrap(),
            Command::Render(path) if path == PathBuf::from("/tmp/out")
        ));
        assert!(matches!(
            Command::parse("render="),
            Err(CommandError::MissingRenderPath)
        ));
        assert!(matches!(Command::parse("q").unwrap(), Command::Quit));
        assert!(matches!(Command::parse("quit\r\n").unwrap(), Command::Quit));
        assert!(matches!(Command::parse("hello").unwrap(), Command::Other(_)));
        assert!(matches!(Command::parse("").unwrap(), Command::Other(_)));
    }
}
