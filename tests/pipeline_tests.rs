// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end takes through the software writer and transcoder

mod common;

use common::{AUDIO_FORMAT, FRAME_SIZE, FakeWriterFactory, ManualProvider, chunk, config, temp_dir};
use filtercam::backends::audio::AudioChunk;
use filtercam::media::y4m;
use filtercam::pipelines::transcode::{Transcoder, Y4mTranscoder};
use filtercam::pipelines::video::software::{Y4mWriterFactory, sidecar_path};
use filtercam::{
    ChannelObserver, Dimensions, DevicePosition, FilterCam, Frame, PipelineEvent, QualityPreset,
    Timestamp, TranscodeError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const FRAME_NANOS: u64 = 1_000_000_000 / 30;

async fn next_matching(
    events: &mut UnboundedReceiver<PipelineEvent>,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> PipelineEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("pipeline closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

struct FailingTranscoder;

impl Transcoder for FailingTranscoder {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn transcode(&self, _source: &Path, _destination: &Path) -> Result<PathBuf, TranscodeError> {
        Err(TranscodeError::ExportFailed("encoder crashed".to_string()))
    }
}

fn y4m_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "y4m"))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_three_second_take_is_rotated() {
    let dir = temp_dir();
    let provider = ManualProvider::new(vec![QualityPreset::Low]);
    let feed = Arc::clone(&provider.feed);
    let (observer, mut events) = ChannelObserver::new();
    let cam = FilterCam::builder(config(&dir, QualityPreset::Low, true))
        .provider(Arc::new(provider))
        .writer_factory(Arc::new(Y4mWriterFactory))
        .transcoder(Arc::new(Y4mTranscoder))
        .observer(observer)
        .build()
        .unwrap();

    cam.start_capture();
    next_matching(&mut events, |e| *e == PipelineEvent::CaptureDidStart).await;
    feed.push_frame(Frame::filled(FRAME_SIZE, [200, 40, 40, 255], Timestamp::ZERO));
    feed.push_audio(chunk(0));
    cam.flush();
    cam.start_recording();
    next_matching(&mut events, |e| *e == PipelineEvent::DidStartRecording).await;

    let base = 1_000_000_000;
    for i in 0..=90u64 {
        let at = Timestamp::from_nanos(base + i * 1_000_000_000 / 30);
        feed.push_frame(Frame::filled(FRAME_SIZE, [200, 40, 40, 255], at));
        for j in 0..3u64 {
            let at = Timestamp::from_nanos(base + i * 1_000_000_000 / 30 + j * 11_111_111);
            feed.push_audio(AudioChunk::silence(AUDIO_FORMAT, 533, at));
        }
    }
    cam.flush();
    assert_eq!(cam.recording_seconds(), 3);
    cam.stop_recording();

    let PipelineEvent::DidFinishWriting(recorded) =
        next_matching(&mut events, |e| matches!(e, PipelineEvent::DidFinishWriting(_))).await
    else {
        unreachable!()
    };
    assert_eq!(recorded, cam.temp_path());

    let PipelineEvent::OutputReady(output) = next_matching(&mut events, |e| {
        matches!(e, PipelineEvent::OutputReady(_) | PipelineEvent::OutputFailed(_))
    })
    .await
    else {
        panic!("transcode failed");
    };

    let info = y4m::probe(&output).unwrap();
    assert_eq!(info.header.dimensions, Dimensions::new(48, 64));
    let duration = info.duration().as_secs_f64();
    assert!((duration - 3.0).abs() <= 1.0 / 30.0 + 1e-6, "duration {}", duration);
    assert!(sidecar_path(&output).exists());

    // Only the rotated take is left behind
    assert!(!cam.temp_path().exists());
    assert_eq!(y4m_files(&dir), vec![output]);

    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_transcode_keeps_recording() {
    let dir = temp_dir();
    let provider = ManualProvider::new(vec![QualityPreset::Low]);
    let feed = Arc::clone(&provider.feed);
    let (observer, mut events) = ChannelObserver::new();
    let cam = FilterCam::builder(config(&dir, QualityPreset::Low, true))
        .provider(Arc::new(provider))
        .writer_factory(Arc::new(Y4mWriterFactory))
        .transcoder(Arc::new(FailingTranscoder))
        .observer(observer)
        .build()
        .unwrap();

    cam.start_capture();
    next_matching(&mut events, |e| *e == PipelineEvent::CaptureDidStart).await;
    feed.push_frame(Frame::filled(FRAME_SIZE, [0, 0, 0, 255], Timestamp::ZERO));
    feed.push_audio(chunk(0));
    cam.flush();
    cam.start_recording();
    next_matching(&mut events, |e| *e == PipelineEvent::DidStartRecording).await;
    for i in 1..=10u64 {
        feed.push_frame(Frame::filled(
            FRAME_SIZE,
            [0, 0, 0, 255],
            Timestamp::from_nanos(i * FRAME_NANOS),
        ));
    }
    cam.flush();
    cam.stop_recording();

    let event = next_matching(&mut events, |e| {
        matches!(e, PipelineEvent::OutputReady(_) | PipelineEvent::OutputFailed(_))
    })
    .await;
    assert!(matches!(event, PipelineEvent::OutputFailed(ref reason) if reason.contains("encoder crashed")));

    // The take was moved off the fixed path and kept
    let kept = y4m_files(&dir);
    assert_eq!(kept.len(), 1);
    assert_ne!(kept[0], cam.temp_path());
    assert_eq!(y4m::probe(&kept[0]).unwrap().frame_count, 10);

    // Future takes are unaffected
    cam.start_recording();
    next_matching(&mut events, |e| *e == PipelineEvent::DidStartRecording).await;

    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_front_camera_frames_are_flipped() {
    let dir = temp_dir();
    let provider = ManualProvider::new(vec![QualityPreset::Low]);
    let feed = Arc::clone(&provider.feed);
    let writers = Arc::new(FakeWriterFactory::default());
    let (observer, mut events) = ChannelObserver::new();
    let mut front = config(&dir, QualityPreset::Low, false);
    front.capture.device_position = DevicePosition::Front;
    let cam = FilterCam::builder(front)
        .provider(Arc::new(provider))
        .writer_factory(writers.clone())
        .observer(observer)
        .build()
        .unwrap();

    let wait = |events: &mut UnboundedReceiver<PipelineEvent>, wanted: PipelineEvent| {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if events.try_recv().ok().as_ref() == Some(&wanted) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("{:?} not received", wanted);
    };

    let top_red = {
        let mut image = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 255, 255]));
        for x in 0..4 {
            image.put_pixel(x, 0, image::Rgba([255, 0, 0, 255]));
        }
        image
    };

    cam.start_capture();
    wait(&mut events, PipelineEvent::CaptureDidStart);
    feed.push_frame(Frame::from_image(top_red.clone(), Timestamp::ZERO));
    feed.push_audio(chunk(0));
    cam.flush();
    cam.start_recording();
    wait(&mut events, PipelineEvent::DidStartRecording);
    feed.push_frame(Frame::from_image(top_red, Timestamp::from_millis(33)));
    cam.flush();

    let log = writers.log.lock().unwrap();
    assert_eq!(log.video, vec![(Timestamp::from_millis(33), [0, 0, 255, 255])]);
    drop(log);
    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}
