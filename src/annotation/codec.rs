use thiserror::Error;

/// Per-frame integer groups, in the order the frames first appear in the input.
pub type FrameGroups<const K: usize> = Vec<(usize, Vec<[i32; K]>)>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("entry `{0}` is missing `=`")]
    MissingSeparator(String),

    #[error("invalid frame index `{0}`")]
    InvalidFrame(String),

    #[error("frame {0}: empty value in list")]
    EmptyValue(usize),

    #[error("frame {frame}: `{token}` is not an integer")]
    InvalidValue { frame: usize, token: String },

    #[error("frame {frame}: {count} values cannot be grouped by {arity}")]
    Arity {
        frame: usize,
        count: usize,
        arity: usize,
    },
}

/// Decode `f0=v1,v2;f1=v3` into flat integer lists keyed by frame.
///
/// Empty segments (a trailing `;`) are skipped and `0=` yields an empty list,
/// but an empty value inside a list (`0=1,,2`) is an error.
/// A frame repeated in the same string keeps its first position but takes
/// the later values.
pub fn decode_flat(input: &str) -> Result<Vec<(usize, Vec<i32>)>, CodecError> {
    let mut frames: Vec<(usize, Vec<i32>)> = Vec::new();

    for segment in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, values) = segment
            .split_once('=')
            .ok_or_else(|| CodecError::MissingSeparator(segment.to_string()))?;

        let key = key.trim();
        let frame: usize = key
            .parse()
            .map_err(|_| CodecError::InvalidFrame(key.to_string()))?;

        let values = values.trim();
        let values = if values.is_empty() {
            Vec::new()
        } else {
            values
                .split(',')
                .map(str::trim)
                .map(|token| {
                    if token.is_empty() {
                        return Err(CodecError::EmptyValue(frame));
                    }
                    token.parse::<i32>().map_err(|_| CodecError::InvalidValue {
                        frame,
                        token: token.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        match frames.iter_mut().find(|(f, _)| *f == frame) {
            Some(entry) => entry.1 = values,
            None => frames.push((frame, values)),
        }
    }

    Ok(frames)
}

/// Decode and regroup every frame's values into `K`-tuples.
pub fn decode<const K: usize>(input: &str) -> Result<FrameGroups<K>, CodecError> {
    decode_flat(input)?
        .into_iter()
        .map(|(frame, values)| group::<K>(frame, &values).map(|groups| (frame, groups)))
        .collect()
}

fn group<const K: usize>(frame: usize, values: &[i32]) -> Result<Vec<[i32; K]>, CodecError> {
    if K == 0 || values.len() % K != 0 {
        return Err(CodecError::Arity {
            frame,
            count: values.len(),
            arity: K,
        });
    }

    Ok(values
        .chunks_exact(K)
        .map(|chunk| {
            let mut tuple = [0; K];
            tuple.copy_from_slice(chunk);
            tuple
        })
        .collect())
}

/// Inverse of [`decode`].
#[cfg(test)]
pub fn encode<const K: usize>(frames: &[(usize, Vec<[i32; K]>)]) -> String {
    frames
        .iter()
        .map(|(frame, groups)| {
            let values: Vec<String> = groups
                .iter()
                .flat_map(|tuple| tuple.iter())
                .map(i32::to_string)
                .collect();
            format!("{}={}", frame, values.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_boxes() {
        let boxes = decode::<4>("0=1,2,3,4").unwrap();
        assert_eq!(boxes, vec![(0, vec![[1, 2, 3, 4]])]);
    }

    #[test]
    fn rejects_partial_point() {
        let err = decode::<2>("0=1,2,3").unwrap_err();
        assert_eq!(
            err,
            CodecError::Arity {
                frame: 0,
                count: 3,
                arity: 2
            }
        );
        assert!(err.to_string().contains("frame 0"));
    }

    #[test]
    fn keeps_frame_order_of_input() {
        let points = decode::<2>("5=1,2;0=3,4,5,6").unwrap();
        assert_eq!(
            points,
            vec![(5, vec![[1, 2]]), (0, vec![[3, 4], [5, 6]])]
        );
    }

    #[test]
    fn empty_value_list_is_not_an_error() {
        assert_eq!(decode::<2>("0=").unwrap(), vec![(0, vec![])]);
        assert_eq!(decode_flat("").unwrap(), vec![]);
    }

    #[test]
    fn empty_value_inside_list_is_an_error() {
        assert_eq!(decode::<2>("0=10,,20"), Err(CodecError::EmptyValue(0)));
        assert_eq!(decode::<2>("0=10,20,,"), Err(CodecError::EmptyValue(0)));
        assert_eq!(decode_flat("4=,1"), Err(CodecError::EmptyValue(4)));
        assert_eq!(decode::<2>("0= ").unwrap(), vec![(0, vec![])]);
    }

    #[test]
    fn repeated_frame_replaces_values() {
        let labels = decode_flat("3=1;7=0;3=0,0").unwrap();
        assert_eq!(labels, vec![(3, vec![0, 0]), (7, vec![0])]);
    }

    #[test]
    fn reports_bad_tokens() {
        assert!(matches!(
            decode_flat("0=1,x"),
            Err(CodecError::InvalidValue { frame: 0, .. })
        ));
        assert!(matches!(
            decode_flat("a=1"),
            Err(CodecError::InvalidFrame(_))
        ));
        assert!(matches!(
            decode_flat("12"),
            Err(CodecError::MissingSeparator(_))
        ));
    }

    fn frames_strategy() -> impl Strategy<Value = Vec<(usize, Vec<[i32; 2]>)>> {
        prop::collection::btree_map(
            0usize..500,
            prop::collection::vec(prop::array::uniform2(-4000i32..4000), 0..6),
            0..8,
        )
        .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn encoded_points_decode_to_same_mapping(frames in frames_strategy()) {
            let encoded = encode(&frames);
            let decoded = decode::<2>(&encoded).unwrap();
            prop_assert_eq!(decoded, frames);
        }
    }
}
