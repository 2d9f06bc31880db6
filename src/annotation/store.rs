use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::segmentation::{BoxCoords, Label, Point, Prompt};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("frame {frame}: {points} points but {labels} labels")]
    LabelCount {
        frame: usize,
        points: usize,
        labels: usize,
    },

    #[error("frame {0}: points given without labels")]
    MissingLabels(usize),

    #[error("frame {0}: labels given without points")]
    MissingPoints(usize),

    #[error("frame {frame}: label {value} is neither 0 nor 1")]
    InvalidLabel { frame: usize, value: i32 },

    #[error("frame {0}: box needs exactly 4 values")]
    InvalidBox(usize),
}

/// Decoded annotations carried by one command, not yet applied.
#[derive(Debug, Clone, Default)]
pub struct AnnotationUpdate {
    pub points: Vec<(usize, Vec<Point>)>,
    pub labels: Vec<(usize, Vec<i32>)>,
    pub boxes: Vec<(usize, Vec<BoxCoords>)>,
}

impl AnnotationUpdate {
    /// Every frame index the update mentions.
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        let points = self.points.iter().map(|(frame, _)| *frame);
        let labels = self.labels.iter().map(|(frame, _)| *frame);
        let boxes = self.boxes.iter().map(|(frame, _)| *frame);
        points.chain(labels).chain(boxes)
    }
}

/// Frame index → points, labels and box, kept for the whole session.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    points: HashMap<usize, Vec<Point>>,
    labels: HashMap<usize, Vec<Label>>,
    boxes: BTreeMap<usize, BoxCoords>,
    // frames with points, in first-insertion order
    point_order: Vec<usize>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the whole update, then replace the entries it names.
    ///
    /// Nothing is written when any frame fails validation.
    pub fn apply(&mut self, update: AnnotationUpdate) -> Result<(), AnnotationError> {
        let mut labelled: HashMap<usize, Vec<Label>> = HashMap::new();
        for (frame, values) in &update.labels {
            let labels = values
                .iter()
                .map(|&value| {
                    Label::try_from(value)
                        .map_err(|value| AnnotationError::InvalidLabel { frame: *frame, value })
                })
                .collect::<Result<Vec<_>, _>>()?;
            labelled.insert(*frame, labels);
        }

        for (frame, points) in &update.points {
            let labels = labelled
                .get(frame)
                .ok_or(AnnotationError::MissingLabels(*frame))?;
            if labels.len() != points.len() {
                return Err(AnnotationError::LabelCount {
                    frame: *frame,
                    points: points.len(),
                    labels: labels.len(),
                });
            }
        }
        if let Some((frame, _)) = update
            .labels
            .iter()
            .find(|(frame, _)| !update.points.iter().any(|(f, _)| f == frame))
        {
            return Err(AnnotationError::MissingPoints(*frame));
        }

        let mut boxes = Vec::with_capacity(update.boxes.len());
        for (frame, values) in update.boxes {
            match values.as_slice() {
                [bbox] => boxes.push((frame, *bbox)),
                _ => return Err(AnnotationError::InvalidBox(frame)),
            }
        }

        for (frame, points) in update.points {
            if !self.point_order.contains(&frame) {
                self.point_order.push(frame);
            }
            self.points.insert(frame, points);
        }
        self.labels.extend(labelled);
        self.boxes.extend(boxes);

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.point_order.is_empty() && self.boxes.is_empty()
    }

    pub fn points(&self, frame: usize) -> Option<&[Point]> {
        self.points.get(&frame).map(Vec::as_slice)
    }

    pub fn labels(&self, frame: usize) -> Option<&[Label]> {
        self.labels.get(&frame).map(Vec::as_slice)
    }

    pub fn bbox(&self, frame: usize) -> Option<BoxCoords> {
        self.boxes.get(&frame).copied()
    }

    /// Everything known about `frame`, as an engine prompt.
    pub fn prompt(&self, frame: usize) -> Prompt {
        Prompt {
            points: self.points(frame).map(<[Point]>::to_vec).unwrap_or_default(),
            labels: self.labels(frame).map(<[Label]>::to_vec).unwrap_or_default(),
            bbox: self.bbox(frame),
        }
    }

    /// Order in which frames are pushed to the video engine.
    ///
    /// Point frames in first-insertion order, then box-only frames ascending.
    pub fn replay_order(&self) -> Vec<usize> {
        let mut order = self.point_order.clone();
        order.extend(
            self.boxes
                .keys()
                .filter(|frame| !self.point_order.contains(*frame)),
        );
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(frame: usize, coords: &[[i32; 2]]) -> (usize, Vec<Point>) {
        (frame, coords.iter().copied().map(Point::from).collect())
    }

    fn bx(frame: usize, coords: [i32; 4]) -> (usize, Vec<BoxCoords>) {
        (frame, vec![BoxCoords::from(coords)])
    }

    #[test]
    fn box_frames_follow_point_frames_without_duplicates() {
        let mut store = AnnotationStore::new();
        store
            .apply(AnnotationUpdate {
                points: vec![pts(0, &[[1, 1]]), pts(5, &[[2, 2]])],
                labels: vec![(0, vec![1]), (5, vec![1])],
                boxes: vec![bx(9, [0, 0, 4, 4]), bx(5, [1, 1, 3, 3])],
            })
            .unwrap();

        assert_eq!(store.replay_order(), vec![0, 5, 9]);
    }

    #[test]
    fn point_frames_keep_first_insertion_order() {
        let mut store = AnnotationStore::new();
        for frame in [7, 2, 7] {
            store
                .apply(AnnotationUpdate {
                    points: vec![pts(frame, &[[frame as i32, 0]])],
                    labels: vec![(frame, vec![1])],
                    boxes: vec![],
                })
                .unwrap();
        }
        store
            .apply(AnnotationUpdate {
                boxes: vec![bx(4, [0, 0, 1, 1]), bx(1, [0, 0, 1, 1])],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.replay_order(), vec![7, 2, 1, 4]);
    }

    #[test]
    fn later_update_replaces_frame_entry() {
        let mut store = AnnotationStore::new();
        store
            .apply(AnnotationUpdate {
                points: vec![pts(0, &[[1, 1], [2, 2]])],
                labels: vec![(0, vec![1, 0])],
                boxes: vec![],
            })
            .unwrap();
        store
            .apply(AnnotationUpdate {
                points: vec![pts(0, &[[9, 9]])],
                labels: vec![(0, vec![1])],
                boxes: vec![],
            })
            .unwrap();

        let prompt = store.prompt(0);
        assert_eq!(prompt.points, vec![Point { x: 9, y: 9 }]);
        assert_eq!(prompt.labels, vec![Label::Include]);
        assert_eq!(prompt.bbox, None);
    }

    #[test]
    fn rejected_update_leaves_store_untouched() {
        let mut store = AnnotationStore::new();
        let err = store
            .apply(AnnotationUpdate {
                points: vec![pts(0, &[[1, 1]]), pts(3, &[[1, 1], [2, 2]])],
                labels: vec![(0, vec![1]), (3, vec![1])],
                boxes: vec![bx(3, [0, 0, 1, 1])],
            })
            .unwrap_err();

        assert_eq!(
            err,
            AnnotationError::LabelCount {
                frame: 3,
                points: 2,
                labels: 1
            }
        );
        assert!(store.is_empty());
        assert!(store.points(0).is_none());
    }

    #[test]
    fn labels_must_be_binary() {
        let mut store = AnnotationStore::new();
        let err = store
            .apply(AnnotationUpdate {
                points: vec![pts(0, &[[1, 1]])],
                labels: vec![(0, vec![2])],
                boxes: vec![],
            })
            .unwrap_err();
        assert_eq!(err, AnnotationError::InvalidLabel { frame: 0, value: 2 });
    }

    #[test]
    fn points_and_labels_travel_together() {
        let mut store = AnnotationStore::new();
        assert_eq!(
            store.apply(AnnotationUpdate {
                points: vec![pts(1, &[[1, 1]])],
                ..Default::default()
            }),
            Err(AnnotationError::MissingLabels(1))
        );
        assert_eq!(
            store.apply(AnnotationUpdate {
                labels: vec![(2, vec![1])],
                ..Default::default()
            }),
            Err(AnnotationError::MissingPoints(2))
        );
    }
}
