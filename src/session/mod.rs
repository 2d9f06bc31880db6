mod command;
mod state;

pub use command::{Command, PreviewRequest};
pub use state::SessionState;

use crate::annotation::{AnnotationError, AnnotationStore};
use crate::output::{MaskRenderer, OutputError, ProgressSink};
use crate::segmentation::{
    FrameSet, ImagePredictor, ObjectId, SegmentationEngine, VideoPredictor,
};
use anyhow::Result as AnyResult;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("video state is still loading")]
    StillLoading,

    #[error("nothing annotated yet")]
    NoAnnotations,

    #[error("session is {0}")]
    Unavailable(SessionState),

    #[error("frame {frame} is out of range ({count} frames)")]
    FrameOutOfRange { frame: usize, count: usize },

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error("{0:#}")]
    Frame(anyhow::Error),

    #[error("engine error: {0:#}")]
    Engine(anyhow::Error),

    #[error("video state failed to load: {0}")]
    VideoLoad(String),

    #[error("engine reported frame {index} after frame {previous:?} ({count} frames)")]
    UnexpectedFrame {
        index: usize,
        previous: Option<usize>,
        count: usize,
    },

    #[error("failed to create {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl SessionError {
    /// Whether a failed `render` leaves the session unable to continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::StillLoading
                | SessionError::NoAnnotations
                | SessionError::Unavailable(_)
                | SessionError::FrameOutOfRange { .. }
                | SessionError::Annotation(_)
        )
    }
}

#[derive(Debug)]
pub struct PreviewOutcome {
    pub frame: usize,
    pub path: PathBuf,
    pub score: f32,
}

#[derive(Debug)]
pub struct RenderOutcome {
    pub frames: usize,
    pub written: usize,
}

type VideoInit = AnyResult<Box<dyn VideoPredictor>>;

enum VideoSlot {
    Idle,
    Loading(Receiver<VideoInit>),
    Ready(Box<dyn VideoPredictor>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Rendering,
    Closed,
}

pub struct SessionOptions {
    pub preview_output: PathBuf,
    pub offload: bool,
}

/// One annotation session: the annotation store, both engine handles and
/// the render pipeline. Commands are handled strictly one at a time.
pub struct Session {
    engine: Arc<dyn SegmentationEngine>,
    frames: Arc<FrameSet>,
    renderer: MaskRenderer,
    store: AnnotationStore,
    preview: Option<Box<dyn ImagePredictor>>,
    video: VideoSlot,
    options: SessionOptions,
    phase: Phase,
}

impl Session {
    pub fn new(
        engine: Arc<dyn SegmentationEngine>,
        frames: FrameSet,
        renderer: MaskRenderer,
        options: SessionOptions,
    ) -> Self {
        Self {
            engine,
            frames: Arc::new(frames),
            renderer,
            store: AnnotationStore::new(),
            preview: None,
            video: VideoSlot::Idle,
            options,
            phase: Phase::Active,
        }
    }

    pub fn state(&self) -> SessionState {
        match (self.phase, &self.video) {
            (Phase::Closed, _) => SessionState::Closed,
            (Phase::Rendering, _) => SessionState::Rendering,
            (Phase::Active, VideoSlot::Ready(_)) => SessionState::VideoReady,
            (Phase::Active, VideoSlot::Loading(_)) => SessionState::VideoLoading,
            (Phase::Active, _) if self.preview.is_some() => SessionState::PreviewReady,
            (Phase::Active, _) => SessionState::Uninitialized,
        }
    }

    #[cfg(test)]
    pub fn annotations(&self) -> &AnnotationStore {
        &self.store
    }

    /// Check the background loader without blocking.
    #[cfg(test)]
    pub fn video_ready(&mut self) -> bool {
        self.poll_video();
        matches!(self.video, VideoSlot::Ready(_))
    }

    /// Record the request's annotations, predict on its frame and write the
    /// preview image. The first successful preview starts video loading.
    ///
    /// The annotations are only kept once the preview has been written.
    pub fn preview(&mut self, request: PreviewRequest) -> Result<PreviewOutcome, SessionError> {
        self.ensure_active()?;
        self.poll_video();

        let frame = request.frame;
        let count = self.frames.len();
        if let Some(frame) = std::iter::once(frame)
            .chain(request.update.frames())
            .find(|&f| f >= count)
        {
            return Err(SessionError::FrameOutOfRange { frame, count });
        }

        let mut staged = self.store.clone();
        staged.apply(request.update)?;

        let image = self.frames.load(frame).map_err(SessionError::Frame)?;

        let mut predictor = match self.preview.take() {
            Some(predictor) => predictor,
            None => {
                let predictor = self.engine.image_predictor().map_err(SessionError::Engine)?;
                tracing::info!("Image predictor ready");
                predictor
            }
        };
        let result = predictor.predict(&image, &staged.prompt(frame));
        self.preview = Some(predictor);
        let prediction = result.map_err(SessionError::Engine)?;

        let base = request
            .output
            .as_deref()
            .unwrap_or(&self.options.preview_output);
        let path = self
            .renderer
            .save_preview(&prediction.mask, ObjectId::DEFAULT, base, frame)?;
        tracing::info!("Preview for frame {} saved as {}", frame, path.display());

        self.store = staged;
        self.start_video_loading();

        Ok(PreviewOutcome {
            frame,
            path,
            score: prediction.score,
        })
    }

    /// Push all annotations into the video state, propagate and write one
    /// PNG per frame into `output_dir`. A session renders at most once.
    pub fn render<P: ProgressSink + ?Sized>(
        &mut self,
        output_dir: &Path,
        progress: &mut P,
    ) -> Result<RenderOutcome, SessionError> {
        self.ensure_active()?;
        self.poll_video();

        let mut video = match std::mem::replace(&mut self.video, VideoSlot::Idle) {
            VideoSlot::Ready(video) => video,
            VideoSlot::Idle => {
                self.start_video_loading();
                return Err(SessionError::StillLoading);
            }
            VideoSlot::Loading(rx) => {
                self.video = VideoSlot::Loading(rx);
                return Err(SessionError::StillLoading);
            }
            VideoSlot::Failed(reason) => {
                self.video = VideoSlot::Failed(reason.clone());
                return Err(SessionError::VideoLoad(reason));
            }
        };
        if self.store.is_empty() {
            self.video = VideoSlot::Ready(video);
            return Err(SessionError::NoAnnotations);
        }

        self.phase = Phase::Rendering;
        if self.preview.take().is_some() {
            tracing::info!("Released image predictor");
        }

        let outcome = self.propagate_into(video.as_mut(), output_dir, progress)?;

        drop(video);
        tracing::info!("Released video state");
        self.phase = Phase::Closed;
        Ok(outcome)
    }

    /// Drop both engine handles and refuse further commands.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.preview = None;
        if let VideoSlot::Loading(_) = self.video {
            tracing::debug!("Abandoning video state initialisation");
        }
        self.video = VideoSlot::Idle;
        self.phase = Phase::Closed;
        tracing::info!("Session closed");
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Active => Ok(()),
            _ => Err(SessionError::Unavailable(self.state())),
        }
    }

    fn start_video_loading(&mut self) {
        if !matches!(self.video, VideoSlot::Idle) {
            return;
        }

        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let frames = Arc::clone(&self.frames);
        let offload = self.options.offload;
        if offload {
            tracing::info!("Video frames will be offloaded from the compute device");
        }

        let spawned = std::thread::Builder::new()
            .name("video-init".to_string())
            .spawn(move || {
                let result = engine.init_video_state(&frames, offload);
                // the session may have closed meanwhile
                let _ = tx.send(result);
            });

        self.video = match spawned {
            Ok(_) => {
                tracing::info!("Loading video state in the background");
                VideoSlot::Loading(rx)
            }
            Err(e) => VideoSlot::Failed(format!("could not start loader thread: {}", e)),
        };
    }

    fn poll_video(&mut self) {
        let VideoSlot::Loading(rx) = &self.video else {
            return;
        };
        let next = match rx.try_recv() {
            Ok(Ok(predictor)) => {
                tracing::info!("Video state loaded");
                VideoSlot::Ready(predictor)
            }
            Ok(Err(e)) => {
                tracing::error!("Video state failed to load: {:#}", e);
                VideoSlot::Failed(format!("{:#}", e))
            }
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                VideoSlot::Failed("loader exited without a result".to_string())
            }
        };
        self.video = next;
    }

    fn propagate_into<P: ProgressSink + ?Sized>(
        &self,
        video: &mut dyn VideoPredictor,
        output_dir: &Path,
        progress: &mut P,
    ) -> Result<RenderOutcome, SessionError> {
        std::fs::create_dir_all(output_dir).map_err(|source| SessionError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        tracing::info!("Adding annotations...");
        for frame in self.store.replay_order() {
            video
                .add_annotation(frame, ObjectId::DEFAULT, &self.store.prompt(frame))
                .map_err(SessionError::Engine)?;
        }

        let count = self.frames.len();
        let mut previous: Option<usize> = None;
        let mut written = 0;

        tracing::info!("Rendering {} frames into {}", count, output_dir.display());
        for (done, item) in video.propagate().map_err(SessionError::Engine)?.enumerate() {
            let frame = item.map_err(SessionError::Engine)?;
            if frame.index >= count || previous.is_some_and(|p| frame.index <= p) {
                return Err(SessionError::UnexpectedFrame {
                    index: frame.index,
                    previous,
                    count,
                });
            }
            previous = Some(frame.index);

            if self
                .renderer
                .render_frame(&frame.masks, frame.index, output_dir)?
                .is_some()
            {
                written += 1;
            }
            progress.frame_done(done + 1, count);
        }

        tracing::info!("Wrote {} mask frames", written);
        Ok(RenderOutcome {
            frames: count,
            written,
        })
    }
}
