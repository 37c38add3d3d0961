// SPDX-License-Identifier: GPL-3.0-only

//! Capture lifecycle and device controls

mod common;

use common::{Harness, ManualProvider, config, frame, temp_dir};
use filtercam::backends::camera::synthetic::{SyntheticOptions, SyntheticProvider};
use filtercam::backends::camera::types::TorchMode;
use filtercam::{
    CaptureError, ChannelObserver, FilterCam, NormalizedPoint, PipelineEvent, QualityPreset,
};
use std::sync::Arc;

#[test]
fn test_unsupported_preset_fails_start() {
    let mut h = Harness::new(vec![QualityPreset::Low], QualityPreset::Hd1080);
    h.cam.start_capture();
    let events = h.events_until(|e| matches!(e, PipelineEvent::CaptureDidFail(_)));
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::CaptureDidFail(CaptureError::PresetNotSupported(
            QualityPreset::Hd1080
        )))
    );
    assert!(!events.contains(&PipelineEvent::CaptureDidStart));
    assert!(!h.drain().contains(&PipelineEvent::CaptureDidStart));
    assert!(!h.cam.is_capturing());
}

#[test]
fn test_missing_microphone_fails_start() {
    let dir = temp_dir();
    let mut provider = ManualProvider::new(vec![QualityPreset::Low]);
    provider.microphone = false;
    let (observer, mut events) = ChannelObserver::new();
    let cam = FilterCam::builder(config(&dir, QualityPreset::Low, false))
        .provider(Arc::new(provider))
        .observer(observer)
        .build()
        .unwrap();
    cam.start_capture();
    cam.flush();
    cam.flush();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            PipelineEvent::CaptureWillStart,
            PipelineEvent::CaptureDidFail(CaptureError::AudioDeviceNotFound),
        ]
    );
    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_start_twice_and_stop_twice() {
    let mut h = Harness::running();
    h.cam.start_capture();
    h.cam.stop_capture();
    h.cam.stop_capture();
    let events = h.events_until(|e| *e == PipelineEvent::CaptureDidStop);
    assert_eq!(
        events,
        vec![PipelineEvent::CaptureWillStop, PipelineEvent::CaptureDidStop]
    );
    assert!(h.drain().is_empty());
    assert!(!h.feed.push_frame(frame(0, [0, 0, 0, 255])));
}

#[test]
fn test_restart_after_stop() {
    let mut h = Harness::running();
    h.cam.stop_capture();
    h.expect(|e| *e == PipelineEvent::CaptureDidStop);
    h.cam.start_capture();
    h.expect(|e| *e == PipelineEvent::CaptureDidStart);
    assert!(h.feed.push_frame(frame(0, [0, 0, 0, 255])));
}

#[test]
fn test_torch_threshold() {
    let dir = temp_dir();
    let provider = Arc::new(SyntheticProvider::default());
    let controls = provider.controls();
    let cam = FilterCam::builder(config(&dir, QualityPreset::Low, false))
        .provider(provider)
        .build()
        .unwrap();
    assert!(cam.has_torch());

    cam.set_torch_level(0.6);
    cam.set_torch_level(0.1);
    cam.set_torch_level(4.0);
    cam.flush();
    assert_eq!(cam.torch_level(), 4.0);
    assert_eq!(
        controls.lock().unwrap().torch,
        vec![TorchMode::On(0.6), TorchMode::Off, TorchMode::On(1.0)]
    );
    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_torch_ignored_without_torch() {
    let dir = temp_dir();
    let provider = Arc::new(SyntheticProvider::new(SyntheticOptions {
        torch: false,
        ..SyntheticOptions::default()
    }));
    let controls = provider.controls();
    let cam = FilterCam::builder(config(&dir, QualityPreset::Low, false))
        .provider(provider)
        .build()
        .unwrap();
    assert!(!cam.has_torch());
    cam.set_torch_level(1.0);
    cam.flush();
    assert!(controls.lock().unwrap().torch.is_empty());
    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_focus_falls_back_to_exposure() {
    let dir = temp_dir();
    let provider = Arc::new(SyntheticProvider::new(SyntheticOptions {
        focus_point: false,
        ..SyntheticOptions::default()
    }));
    let controls = provider.controls();
    let cam = FilterCam::builder(config(&dir, QualityPreset::Low, false))
        .provider(provider)
        .build()
        .unwrap();
    let point = NormalizedPoint::new(0.25, 0.75);
    cam.focus(point);
    cam.flush();
    let log = controls.lock().unwrap();
    assert!(log.focus.is_empty());
    assert_eq!(log.exposure, vec![point]);
    drop(log);
    drop(cam);
    std::fs::remove_dir_all(dir).unwrap();
}
