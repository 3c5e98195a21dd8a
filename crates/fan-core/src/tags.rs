/// A telemetry field: its `TickRecord` key and its exported metric name.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
}

pub const CONTROL_TEMP_C: Tag = Tag {
    key: "control_celsius",
    metric: "fand_control_temperature_celsius",
};

pub const TARGET_DUTY: Tag = Tag {
    key: "target_duty",
    metric: "fand_target_duty_percent",
};

pub const APPLIED_DUTY: Tag = Tag {
    key: "applied_duty",
    metric: "fand_applied_duty_percent",
};

pub const DEGRADED: Tag = Tag {
    key: "degraded",
    metric: "fand_aggregation_degraded",
};

pub const FAIL_SAFE: Tag = Tag {
    key: "fail_safe",
    metric: "fand_fail_safe_active",
};

pub const CONTRIBUTING_SOURCES: Tag = Tag {
    key: "contributing",
    metric: "fand_contributing_sources",
};

pub const TICK_DURATION_US: Tag = Tag {
    key: "tick_duration_us",
    metric: "fand_tick_duration_microseconds",
};

/// Every tag exported per tick.
pub const ALL: [Tag; 7] = [
    CONTROL_TEMP_C,
    TARGET_DUTY,
    APPLIED_DUTY,
    DEGRADED,
    FAIL_SAFE,
    CONTRIBUTING_SOURCES,
    TICK_DURATION_US,
];
