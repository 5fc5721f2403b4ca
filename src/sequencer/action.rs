// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Teach steps and the action file format.
//!
//! Action files are JSON arrays with one object per step. The keys are the column titles of the
//! teach table of the pendant software, so files exported from it load unchanged:
//!
//! ```json
//! [
//!     {
//!         "J1/X": "10.0", "J2/X": "0", "J3/X": "0", "J4/X": "0", "J5/X": "0", "J6/X": "0",
//!         "速度": "50", "工具": "吸盘", "开关": "开", "延时": "1.5", "备注": "pick"
//!     }
//! ]
//! ```
//! `工具` is the tool (`""`, `夹爪` gripper, `吸盘` suction cup), `开关` the tool switch (`""`,
//! `开` on, `关` off), `速度` the speed in percent (30 if missing), `延时` the delay in seconds.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exception::{create_range_violation, BlinxException, BlinxResult};
use crate::robot::events::{value_as_f64, TelemetrySample};
use crate::robot::service_types::{ToolSwitch, ToolType};
use crate::utils::JointAngles;

/// Speed used for steps without one.
pub static DEFAULT_SPEED: f64 = 30.;

/// One row of a teach sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionStep {
    /// degrees
    pub joint_angles: JointAngles,
    /// percent, (0, 100]
    pub speed: f64,
    pub tool_type: ToolType,
    pub tool_switch: ToolSwitch,
    /// seconds the device waits after the move in sequential mode
    pub delay: f64,
    /// free text, kept for the operator
    pub note: String,
}

impl ActionStep {
    /// A plain move without tool action or delay.
    pub fn new(joint_angles: JointAngles, speed: f64) -> Self {
        ActionStep {
            joint_angles,
            speed,
            tool_type: ToolType::None,
            tool_switch: ToolSwitch::None,
            delay: 0.,
            note: String::new(),
        }
    }

    pub fn with_tool(mut self, tool_type: ToolType, tool_switch: ToolSwitch) -> Self {
        self.tool_type = tool_type;
        self.tool_switch = tool_switch;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    /// Checks speed and delay.
    /// # Errors
    /// * [`RangeViolation`](`crate::exception::BlinxException::RangeViolation`) - if the speed is
    /// outside (0, 100], the delay is negative or longer than `max_delay_ms`.
    pub fn validate(&self, max_delay_ms: u32) -> BlinxResult<()> {
        check_speed(self.speed)?;
        self.delay_ms(max_delay_ms).map(|_| ())
    }

    /// The delay in whole milliseconds, `None` for steps without delay. Fractions of a
    /// millisecond are dropped.
    pub fn delay_ms(&self, max_delay_ms: u32) -> BlinxResult<Option<u32>> {
        if !self.delay.is_finite() || self.delay < 0. {
            return Err(create_range_violation(format!(
                "delay {} s is not a valid duration",
                self.delay
            )));
        }
        let milliseconds = (self.delay * 1000.).trunc();
        if milliseconds > max_delay_ms as f64 {
            return Err(create_range_violation(format!(
                "delay {} s exceeds {} ms",
                self.delay, max_delay_ms
            )));
        }
        if milliseconds == 0. {
            Ok(None)
        } else {
            Ok(Some(milliseconds as u32))
        }
    }
}

/// Checks a speed in percent against (0, 100].
pub(crate) fn check_speed(speed: f64) -> BlinxResult<()> {
    if speed > 0. && speed <= 100. {
        Ok(())
    } else {
        Err(create_range_violation(format!(
            "speed {} outside (0, 100]",
            speed
        )))
    }
}

#[derive(Serialize, Deserialize)]
struct ActionRecord {
    #[serde(rename = "J1/X", default)]
    j1: Value,
    #[serde(rename = "J2/X", default)]
    j2: Value,
    #[serde(rename = "J3/X", default)]
    j3: Value,
    #[serde(rename = "J4/X", default)]
    j4: Value,
    #[serde(rename = "J5/X", default)]
    j5: Value,
    #[serde(rename = "J6/X", default)]
    j6: Value,
    #[serde(rename = "速度", default)]
    speed: Value,
    #[serde(rename = "工具", default)]
    tool: String,
    #[serde(rename = "开关", default)]
    switch: String,
    #[serde(rename = "延时", default)]
    delay: Value,
    #[serde(rename = "备注", default)]
    note: String,
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn finite_number(value: &Value) -> Option<f64> {
    value_as_f64(value).filter(|number| number.is_finite())
}

fn file_error(row: usize, message: String) -> BlinxException {
    BlinxException::ActionFileException {
        message: format!("step {}: {}", row + 1, message),
    }
}

impl ActionRecord {
    fn into_step(self, row: usize) -> BlinxResult<ActionStep> {
        let mut joint_angles = [0.; 6];
        let values = [&self.j1, &self.j2, &self.j3, &self.j4, &self.j5, &self.j6];
        for (joint, (angle, value)) in joint_angles.iter_mut().zip(values.iter()).enumerate() {
            *angle = finite_number(value)
                .ok_or_else(|| file_error(row, format!("J{}/X {} is not a number", joint + 1, value)))?;
        }
        let speed = if is_blank(&self.speed) {
            DEFAULT_SPEED
        } else {
            finite_number(&self.speed)
                .ok_or_else(|| file_error(row, format!("speed {} is not a number", self.speed)))?
        };
        let delay = if is_blank(&self.delay) {
            0.
        } else {
            finite_number(&self.delay)
                .ok_or_else(|| file_error(row, format!("delay {} is not a number", self.delay)))?
        };
        let tool_type = match self.tool.trim() {
            "" => ToolType::None,
            "夹爪" => ToolType::Gripper,
            "吸盘" => ToolType::Suction,
            other => return Err(file_error(row, format!("unknown tool {:?}", other))),
        };
        let tool_switch = match self.switch.trim() {
            "" => ToolSwitch::None,
            "开" => ToolSwitch::On,
            "关" => ToolSwitch::Off,
            other => return Err(file_error(row, format!("unknown tool switch {:?}", other))),
        };
        Ok(ActionStep {
            joint_angles,
            speed,
            tool_type,
            tool_switch,
            delay,
            note: self.note,
        })
    }

    fn from_step(step: &ActionStep) -> Self {
        let text = |v: f64| Value::String(v.to_string());
        let [j1, j2, j3, j4, j5, j6] = step.joint_angles;
        ActionRecord {
            j1: text(j1),
            j2: text(j2),
            j3: text(j3),
            j4: text(j4),
            j5: text(j5),
            j6: text(j6),
            speed: text(step.speed),
            tool: match step.tool_type {
                ToolType::None => "",
                ToolType::Gripper => "夹爪",
                ToolType::Suction => "吸盘",
            }
            .to_string(),
            switch: match step.tool_switch {
                ToolSwitch::None => "",
                ToolSwitch::On => "开",
                ToolSwitch::Off => "关",
            }
            .to_string(),
            delay: text(step.delay),
            note: step.note.clone(),
        }
    }
}

/// Parses the content of an action file.
/// # Errors
/// * [`ActionFileException`](`crate::exception::BlinxException::ActionFileException`) - naming
/// the first step that could not be read.
pub fn parse_actions(json: &str) -> BlinxResult<Vec<ActionStep>> {
    let records: Vec<ActionRecord> =
        serde_json::from_str(json).map_err(|e| BlinxException::ActionFileException {
            message: format!("invalid action file: {}", e),
        })?;
    records
        .into_iter()
        .enumerate()
        .map(|(row, record)| record.into_step(row))
        .collect()
}

/// Serializes steps in the action file format, indented with four spaces.
pub fn format_actions(steps: &[ActionStep]) -> BlinxResult<String> {
    let records: Vec<ActionRecord> = steps.iter().map(ActionRecord::from_step).collect();
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    records
        .serialize(&mut serializer)
        .map_err(|e| BlinxException::ActionFileException {
            message: format!("cannot serialize actions: {}", e),
        })?;
    String::from_utf8(buffer).map_err(|e| BlinxException::ActionFileException {
        message: e.to_string(),
    })
}

/// Reads an action file.
pub fn load_actions<S: AsRef<Path>>(path: S) -> BlinxResult<Vec<ActionStep>> {
    let json =
        fs::read_to_string(path.as_ref()).map_err(|e| BlinxException::ActionFileException {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
    log::info!("importing actions from {}", path.as_ref().display());
    parse_actions(&json)
}

/// Writes an action file, replacing an existing one.
pub fn save_actions<S: AsRef<Path>>(path: S, steps: &[ActionStep]) -> BlinxResult<()> {
    let json = format_actions(steps)?;
    fs::write(path.as_ref(), json).map_err(|e| BlinxException::ActionFileException {
        message: format!("cannot write {}: {}", path.as_ref().display(), e),
    })?;
    log::info!(
        "exported {} actions to {}",
        steps.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Ordered teach sequence with the editing operations of the teach table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionList {
    steps: Vec<ActionStep>,
    clipboard: Option<ActionStep>,
}

impl ActionList {
    pub fn new() -> Self {
        ActionList::default()
    }

    pub fn from_steps(steps: Vec<ActionStep>) -> Self {
        ActionList {
            steps,
            clipboard: None,
        }
    }

    /// Reads the list from an action file, see [`load_actions`].
    pub fn load<S: AsRef<Path>>(path: S) -> BlinxResult<Self> {
        Ok(ActionList::from_steps(load_actions(path)?))
    }

    /// Writes the list to an action file, see [`save_actions`].
    pub fn save<S: AsRef<Path>>(&self, path: S) -> BlinxResult<()> {
        save_actions(path, &self.steps)
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&ActionStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push(&mut self, step: ActionStep) {
        self.steps.push(step);
    }

    /// Inserts `step` below row `after`, or appends it without a selected row.
    pub fn insert(&mut self, after: Option<usize>, step: ActionStep) -> BlinxResult<()> {
        match after {
            Some(row) => {
                self.check_row(row)?;
                self.steps.insert(row + 1, step);
            }
            None => self.steps.push(step),
        }
        Ok(())
    }

    /// Overwrites every selected row with `step`.
    pub fn update(&mut self, rows: &[usize], step: &ActionStep) -> BlinxResult<()> {
        for &row in rows {
            self.check_row(row)?;
        }
        for &row in rows {
            self.steps[row] = step.clone();
        }
        Ok(())
    }

    /// Removes the selected rows, or the last row if nothing is selected. Returns the removed
    /// steps, last row first.
    pub fn remove(&mut self, rows: &[usize]) -> Vec<ActionStep> {
        if rows.is_empty() {
            return self.steps.pop().into_iter().collect();
        }
        let mut rows: Vec<usize> = rows
            .iter()
            .copied()
            .filter(|&row| row < self.steps.len())
            .collect();
        rows.sort_unstable_by(|a, b| b.cmp(a));
        rows.dedup();
        rows.into_iter().map(|row| self.steps.remove(row)).collect()
    }

    pub fn copy(&mut self, row: usize) -> BlinxResult<()> {
        self.check_row(row)?;
        self.clipboard = Some(self.steps[row].clone());
        Ok(())
    }

    /// Appends the copied step. Returns false if nothing was copied yet.
    pub fn paste(&mut self) -> bool {
        match &self.clipboard {
            Some(step) => {
                self.steps.push(step.clone());
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Appends a plain move to the joint angles of `sample`.
    pub fn record_current(&mut self, sample: &TelemetrySample, speed: f64) -> &mut ActionStep {
        self.steps.push(ActionStep::new(sample.joint_angles, speed));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    fn check_row(&self, row: usize) -> BlinxResult<()> {
        if row < self.steps.len() {
            Ok(())
        } else {
            Err(create_range_violation(format!(
                "no step {} in a list of {}",
                row + 1,
                self.steps.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::Pose;
    use crate::robot::events::TelemetrySample;
    use crate::robot::service_types::{ToolSwitch, ToolType};
    use crate::sequencer::action::{
        format_actions, load_actions, parse_actions, save_actions, ActionList, ActionStep,
    };
    use crate::BlinxException;

    fn step(j1: f64) -> ActionStep {
        ActionStep::new([j1, 0., 0., 0., 0., 0.], 50.)
    }

    fn first_joints(list: &ActionList) -> Vec<f64> {
        list.steps().iter().map(|s| s.joint_angles[0]).collect()
    }

    #[test]
    fn list_editing() {
        let mut list = ActionList::new();
        list.push(step(1.));
        list.push(step(2.));
        list.insert(Some(0), step(3.)).unwrap();
        list.insert(None, step(4.)).unwrap();
        assert_eq!(first_joints(&list), vec![1., 3., 2., 4.]);
        assert!(list.insert(Some(4), step(5.)).is_err());

        list.update(&[1, 2], &step(9.)).unwrap();
        assert_eq!(first_joints(&list), vec![1., 9., 9., 4.]);
        assert!(list.update(&[0, 7], &step(8.)).is_err());
        assert_eq!(list.get(0), Some(&step(1.)));

        assert!(!list.paste());
        list.copy(0).unwrap();
        assert!(list.paste());
        assert_eq!(first_joints(&list), vec![1., 9., 9., 4., 1.]);

        assert_eq!(list.remove(&[]), vec![step(1.)]);
        let removed = list.remove(&[0, 2, 2, 10]);
        assert_eq!(removed, vec![step(9.), step(1.)]);
        assert_eq!(first_joints(&list), vec![9., 4.]);

        list.clear();
        assert!(list.is_empty());
        assert!(list.remove(&[]).is_empty());
    }

    #[test]
    fn records_the_current_position() {
        let mut list = ActionList::new();
        let sample = TelemetrySample {
            joint_angles: [10., 20., 30., 0., -45., 5.],
            pose: Pose::default(),
        };
        list.record_current(&sample, 60.).tool_type = ToolType::Suction;
        assert_eq!(list.len(), 1);
        assert_eq!(list.steps()[0].joint_angles, sample.joint_angles);
        assert_eq!(list.steps()[0].speed, 60.);
        assert_eq!(list.steps()[0].tool_type, ToolType::Suction);
        assert_eq!(list.steps()[0].tool_switch, ToolSwitch::None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");
        list.save(&path).unwrap();
        assert_eq!(ActionList::load(&path).unwrap().steps(), list.steps());
    }

    const EXPORTED: &str = r#"[
        {
            "J1/X": "10.5",
            "J2/X": "-20",
            "J3/X": "0",
            "J4/X": "0",
            "J5/X": "-90",
            "J6/X": "0",
            "速度": "50",
            "工具": "吸盘",
            "开关": "开",
            "延时": "1.5",
            "备注": "pick"
        },
        {
            "J1/X": 0, "J2/X": 0, "J3/X": 0, "J4/X": 0, "J5/X": 0, "J6/X": 0,
            "工具": "",
            "开关": "",
            "延时": ""
        }
    ]"#;

    #[test]
    fn reads_files_exported_by_the_pendant() {
        let steps = parse_actions(EXPORTED).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].joint_angles, [10.5, -20., 0., 0., -90., 0.]);
        assert_eq!(steps[0].speed, 50.);
        assert_eq!(steps[0].tool_type, ToolType::Suction);
        assert_eq!(steps[0].tool_switch, ToolSwitch::On);
        assert_eq!(steps[0].delay, 1.5);
        assert_eq!(steps[0].note, "pick");
        assert_eq!(steps[1], ActionStep::new([0.; 6], 30.));
    }

    #[test]
    fn names_the_broken_step() {
        let json = r#"[{"J1/X": "0", "J2/X": "0", "J3/X": "0", "J4/X": "0", "J5/X": "0", "J6/X": "0"},
                       {"J1/X": "abc", "J2/X": "0", "J3/X": "0", "J4/X": "0", "J5/X": "0", "J6/X": "0"}]"#;
        match parse_actions(json) {
            Err(BlinxException::ActionFileException { message }) => {
                assert!(message.starts_with("step 2"), "{}", message)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_actions("{}").is_err());
        assert!(parse_actions(r#"[{"J1/X":"0","J2/X":"0","J3/X":"0","J4/X":"0","J5/X":"0","J6/X":"0","工具":"hammer"}]"#).is_err());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        for (key, value) in [("J1/X", "NaN"), ("J2/X", "inf"), ("速度", "-inf"), ("延时", "NaN")] {
            let mut record = serde_json::json!({
                "J1/X": "30", "J2/X": "0", "J3/X": "0", "J4/X": "0", "J5/X": "0", "J6/X": "0"
            });
            record[key] = serde_json::json!(value);
            match parse_actions(&serde_json::json!([record]).to_string()) {
                Err(BlinxException::ActionFileException { message }) => {
                    assert!(message.starts_with("step 1"), "{}", message)
                }
                other => panic!("{} = {}: unexpected {:?}", key, value, other),
            }
        }
    }

    #[test]
    fn export_keeps_keys_and_non_ascii() {
        let step = ActionStep::new([1., 2., 3., 4., 5., 6.], 40.)
            .with_tool(ToolType::Gripper, ToolSwitch::Off)
            .with_delay(2.);
        let json = format_actions(&[step.clone()]).unwrap();
        assert!(json.contains("\"速度\": \"40\""));
        assert!(json.contains("\"工具\": \"夹爪\""));
        assert!(json.contains("\n        \"J1/X\": \"1\""));
        assert_eq!(parse_actions(&json).unwrap(), vec![step]);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.json");
        let steps = vec![
            ActionStep::new([0.; 6], 100.),
            ActionStep::new([-15., 10., 5., 0., -30., 45.], 20.).with_delay(0.5),
        ];
        save_actions(&path, &steps).unwrap();
        assert_eq!(load_actions(&path).unwrap(), steps);
        assert!(load_actions(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn validates_speed_and_delay() {
        let step = ActionStep::new([0.; 6], 50.);
        assert!(step.validate(30000).is_ok());
        assert_eq!(step.clone().with_delay(30.).delay_ms(30000).unwrap(), Some(30000));
        assert_eq!(step.clone().with_delay(0.3).delay_ms(30000).unwrap(), Some(300));
        assert_eq!(step.delay_ms(30000).unwrap(), None);
        assert_eq!(step.clone().with_delay(30.0006).delay_ms(30000).unwrap(), Some(30000));
        assert_eq!(step.clone().with_delay(1.2349).delay_ms(30000).unwrap(), Some(1234));
        assert_eq!(step.clone().with_delay(0.0004).delay_ms(30000).unwrap(), None);
        for bad in [
            step.clone().with_delay(31.),
            step.clone().with_delay(-1.),
            ActionStep::new([0.; 6], 0.),
            ActionStep::new([0.; 6], 101.),
        ] {
            match bad.validate(30000) {
                Err(BlinxException::RangeViolation { .. }) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
