use std::time::Duration;

use eframe::Frame;
use egui::{CentralPanel, Color32, Context, Grid, ScrollArea, SidePanel, TopBottomPanel};
use log::warn;
use nalgebra::Vector3;

use crate::engine::SimulationEngine;
use crate::face_tracking::FaceCaptor;
use crate::one_euro_filter::{FilterParams, Param};
use crate::rig::{AffineHandle, Rig, PARAMS_PER_HANDLE};
use crate::session::{FrameOutput, InteractiveSession};
use crate::settings::{ControlMode, Settings};

/// Gizmo pose of the controlled handle, edited from the side panel.
#[derive(Debug, Default, Clone, Copy)]
struct HandlePose {
    translation: [f64; 3],
    /// roll, pitch, yaw in degrees
    angles: [f64; 3],
}

pub struct AppContext {
    settings: Settings,
    session: InteractiveSession<Box<dyn SimulationEngine>>,
    rig: Rig,
    pose: HandlePose,
    face_captor: Option<FaceCaptor>,
    last_frame: Option<FrameOutput>,
    error: Option<String>,
    min_cutoff: f64,
    beta: f64,
    derivative_cutoff: f64,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        session: InteractiveSession<Box<dyn SimulationEngine>>,
        face_captor: Option<FaceCaptor>,
    ) -> Self {
        let params = settings.filter.clone();
        Self {
            rig: Rig::identity(settings.num_handles),
            pose: HandlePose::default(),
            face_captor,
            last_frame: None,
            error: None,
            min_cutoff: first_component(&params.min_cutoff),
            beta: first_component(&params.beta),
            derivative_cutoff: first_component(&params.derivative_cutoff),
            settings,
            session,
        }
    }

    /// One frame of the loop: read the input source, filter, step.
    fn step_simulation(&mut self) -> anyhow::Result<()> {
        let index = self.settings.handle_index;
        match self.settings.mode {
            ControlMode::AffineHandle => {
                let angles = self.pose.angles.map(f64::to_radians);
                let handle = AffineHandle::from_translation_euler(self.pose.translation, angles);
                self.rig.set_handle(index, handle)?;
            }
            ControlMode::FaceTracking => {
                if let Some(captor) = self.face_captor.as_mut() {
                    let (rotation, _) = captor.query_rotation();
                    self.rig.set_block_rotation(index, rotation)?;
                }
            }
        }

        let frame = self.session.advance(self.rig.to_parameters())?;
        self.last_frame = Some(frame);
        Ok(())
    }

    fn apply_filter_knob(&mut self, knob: FilterKnob) {
        let value = match knob {
            FilterKnob::MinCutoff => self.min_cutoff,
            FilterKnob::Beta => self.beta,
            FilterKnob::DerivativeCutoff => self.derivative_cutoff,
        };
        let params = with_knob(self.session.filter_params(), knob, value);
        if &params == self.session.filter_params() {
            return;
        }

        match self.session.set_filter_params(params.clone()) {
            Ok(()) => {
                self.settings.filter = params;
                self.save_settings();
            }
            Err(error) => {
                self.error.replace(format!("{:#}", error));
            }
        }
    }

    fn save_settings(&mut self) {
        if let Err(error) = self.settings.save() {
            warn!("Could not save settings: {:#}", error);
        }
    }

    fn draw_handle_controls(&mut self, ui: &mut egui::Ui) {
        match self.settings.mode {
            ControlMode::AffineHandle => {
                ui.label(format!("Handle {}", self.settings.handle_index));
                Grid::new("handle_pose").show(ui, |ui| {
                    for (axis, value) in ["x", "y", "z"].iter().zip(self.pose.translation.iter_mut()) {
                        ui.label(*axis);
                        ui.add(egui::DragValue::new(value).speed(0.01).range(-5.0..=5.0));
                        ui.end_row();
                    }
                    for (axis, value) in ["roll", "pitch", "yaw"].iter().zip(self.pose.angles.iter_mut()) {
                        ui.label(*axis);
                        ui.add(egui::DragValue::new(value).speed(1.0).range(-180.0..=180.0));
                        ui.end_row();
                    }
                });
                if ui.button("Reset handle").clicked() {
                    self.pose = HandlePose::default();
                }
            }
            ControlMode::FaceTracking => {
                let mut pattern_changed = false;
                ui.horizontal(|ui| {
                    ui.label("OSC address:");
                    let response = ui.text_edit_singleline(&mut self.settings.osc_pattern);
                    if response.lost_focus() {
                        if let Some(captor) = &self.face_captor {
                            captor.server().set_pattern(&self.settings.osc_pattern);
                        }
                        pattern_changed = true;
                    }
                });
                if pattern_changed {
                    self.save_settings();
                }
                self.draw_face_status(ui);
            }
        }
    }

    fn draw_face_status(&self, ui: &mut egui::Ui) {
        match &self.face_captor {
            Some(captor) => {
                ui.label(format!("Head pose samples: {}", captor.samples_received()));
                let mut addresses: Vec<String> =
                    captor.server().get_found_addresses().into_iter().collect();
                addresses.sort();
                for address in addresses {
                    ui.label(address);
                }
            }
            None => {
                ui.colored_label(Color32::RED, "Face tracker not running");
            }
        }
    }

    fn draw_filter_controls(&mut self, ui: &mut egui::Ui) {
        let mut enabled = self.session.filter_enabled();
        if ui.checkbox(&mut enabled, "Smooth input").changed() {
            match self.session.set_filter_enabled(enabled) {
                Ok(()) => {
                    self.settings.filter_enabled = enabled;
                    self.save_settings();
                }
                Err(error) => {
                    self.error.replace(format!("{:#}", error));
                }
            }
        }

        // A drag only rebuilds the filter once, when it is released.
        let mut committed = None;
        Grid::new("filter_params").show(ui, |ui| {
            ui.label("Min cutoff");
            let response =
                ui.add(egui::DragValue::new(&mut self.min_cutoff).speed(0.01).range(0.0..=30.0));
            if is_committed(&response) {
                committed = Some(FilterKnob::MinCutoff);
            }
            ui.end_row();

            ui.label("Beta");
            let response = ui.add(egui::DragValue::new(&mut self.beta).speed(0.001).range(0.0..=10.0));
            if is_committed(&response) {
                committed = Some(FilterKnob::Beta);
            }
            ui.end_row();

            ui.label("Derivative cutoff");
            let response = ui.add(
                egui::DragValue::new(&mut self.derivative_cutoff).speed(0.01).range(0.0..=30.0),
            );
            if is_committed(&response) {
                committed = Some(FilterKnob::DerivativeCutoff);
            }
            ui.end_row();
        });

        if let Some(knob) = committed {
            self.apply_filter_knob(knob);
        }
    }

    fn draw_frame(&self, ui: &mut egui::Ui) {
        let Some(frame) = &self.last_frame else {
            ui.label("Waiting for the first frame");
            return;
        };

        ui.label(format!("Step {}", frame.step));
        ui.label(format!(
            "|z| = {:.4} ({} reduced coordinates)",
            frame.z.norm(),
            self.session.engine().reduced_dimension()
        ));
        if let Ok(rig) = Rig::from_parameters(self.session.state().p()) {
            if let Some(handle) = rig.handles().get(self.settings.handle_index) {
                let origin = handle.transform_point(&Vector3::zeros());
                ui.label(format!(
                    "Smoothed handle origin: ({:+.3}, {:+.3}, {:+.3})",
                    origin.x, origin.y, origin.z
                ));
            }
        }
        ui.add_space(6.0);

        let filter_state = self.session.filter_state();

        // Only the controlled handle's parameters are shown.
        let rows = 4 * self.rig.num_handles();
        let offset = 4 * self.settings.handle_index;
        ScrollArea::vertical().show(ui, |ui| {
            Grid::new("rig_parameters").striped(true).show(ui, |ui| {
                ui.strong("p");
                ui.strong("raw");
                ui.strong("smoothed");
                ui.strong("cutoff (Hz)");
                ui.end_row();

                for k in 0..PARAMS_PER_HANDLE {
                    let (c, r) = (k / 4, k % 4);
                    let i = c * rows + offset + r;
                    ui.label(format!("{}", i));
                    ui.label(format!("{:+.4}", frame.raw.as_slice()[i]));
                    ui.label(format!("{:+.4}", frame.smoothed.as_slice()[i]));
                    match filter_state {
                        Some(state) => {
                            let cutoff = state.adaptive_cutoff(i, state.previous_derivative()[i]);
                            ui.label(format!("{:.3}", cutoff));
                        }
                        None => {
                            ui.label("-");
                        }
                    }
                    ui.end_row();
                }
            });
        });
    }
}

impl eframe::App for AppContext {
    fn update(&mut self, ctx: &Context, _frame: &mut Frame) {
        if let Err(error) = self.step_simulation() {
            warn!("Frame skipped: {:#}", error);
            self.error.replace(format!("{:#}", error));
        }

        let mut dismiss_error = false;
        TopBottomPanel::top("title_bar").show(ctx, |ui| {
            ui.vertical(|ui| {
                ui.heading("Fast CD");
                if let Some(error) = &self.error {
                    ui.horizontal(|ui| {
                        ui.colored_label(Color32::RED, error.as_str());
                        if ui.button("Dismiss").clicked() {
                            dismiss_error = true;
                        }
                    });
                }
                ui.add_space(2.0);
            });
        });
        if dismiss_error {
            self.error = None;
        }

        SidePanel::left("controls")
            .resizable(false)
            .default_width(220.0)
            .show(ctx, |ui| {
                ui.vertical(|ui| {
                    self.draw_handle_controls(ui);
                    ui.separator();
                    self.draw_filter_controls(ui);
                });
            });

        CentralPanel::default().show(ctx, |ui| {
            self.draw_frame(ui);
        });

        let fps = self.settings.max_fps.max(1.0);
        ctx.request_repaint_after(Duration::from_secs_f32(1.0 / fps));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKnob {
    MinCutoff,
    Beta,
    DerivativeCutoff,
}

/// Value edits land when typed in, stepped, or when a drag is released.
fn is_committed(response: &egui::Response) -> bool {
    response.drag_stopped() || (response.changed() && !response.dragged())
}

/// `params` with only the edited knob replaced by a scalar. The others keep
/// whatever form they had, per-component lists included.
fn with_knob(params: &FilterParams, knob: FilterKnob, value: f64) -> FilterParams {
    let mut params = params.clone();
    let slot = match knob {
        FilterKnob::MinCutoff => &mut params.min_cutoff,
        FilterKnob::Beta => &mut params.beta,
        FilterKnob::DerivativeCutoff => &mut params.derivative_cutoff,
    };
    *slot = Param::Scalar(value);
    params
}

fn first_component(param: &Param) -> f64 {
    match param {
        Param::Scalar(value) => *value,
        Param::PerComponent(values) => values.first().copied().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editing_one_knob_keeps_per_component_params() {
        let params = FilterParams {
            min_cutoff: Param::PerComponent(vec![0.5, 2.0]),
            beta: Param::PerComponent(vec![0.0, 0.1]),
            ..FilterParams::default()
        };

        let edited = with_knob(&params, FilterKnob::Beta, 0.3);
        assert_eq!(edited.beta, Param::Scalar(0.3));
        assert_eq!(edited.min_cutoff, Param::PerComponent(vec![0.5, 2.0]));
        assert_eq!(edited.derivative_cutoff, params.derivative_cutoff);
        assert_eq!(edited.initial_derivative, params.initial_derivative);
    }

    #[test]
    fn knob_display_uses_first_component() {
        assert_eq!(first_component(&Param::Scalar(1.5)), 1.5);
        assert_eq!(first_component(&Param::PerComponent(vec![0.2, 0.4])), 0.2);
        assert_eq!(first_component(&Param::PerComponent(vec![])), 0.0);
    }
}
