//! Task file loading and grouping.
//!
//! The task source is a JSON array matching the task model's field names. A
//! missing or unparsable file is logged and treated as an empty task list;
//! the server then has no required agents and simply ingests nothing.

use log::{error, info};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use vigil_net::task::{AgentId, Task};

pub fn load_tasks(path: &Path) -> Vec<Task> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!("Tasks json file {} not readable: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Task>>(&content) {
        Ok(tasks) => {
            info!("Loaded {} task(s) from {}", tasks.len(), path.display());
            tasks
        }
        Err(e) => {
            error!("Couldn't parse tasks json file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Every device id referenced by any task: the set of agents the server
/// waits for before dispatching.
pub fn required_agents(tasks: &[Task]) -> HashSet<AgentId> {
    tasks
        .iter()
        .flat_map(|task| task.devices.iter())
        .map(|device| device.device_id.clone())
        .collect()
}

/// Groups tasks by the devices they reference; each agent receives every
/// task that names it.
pub fn tasks_by_device(tasks: &[Task]) -> HashMap<AgentId, Vec<Task>> {
    let mut grouped: HashMap<AgentId, Vec<Task>> = HashMap::new();
    for task in tasks {
        for device in &task.devices {
            grouped
                .entry(device.device_id.clone())
                .or_default()
                .push(task.clone());
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vigil_net::task::Transport;

    const TASKS_JSON: &str = r#"[
        {
            "task_id": "T0001",
            "frequency": 10,
            "devices": [
                {
                    "device_id": "AG001",
                    "device_metrics": {
                        "cpu_usage": true,
                        "ram_usage": true,
                        "interface_stats": ["eth0"]
                    },
                    "link_metrics": {
                        "bandwidth": {
                            "tool": "iperf",
                            "is_server": false,
                            "server_address": "10.0.0.2",
                            "duration": 10,
                            "transport": "tcp",
                            "frequency": 20
                        },
                        "latency": {
                            "tool": "ping",
                            "destination_address": "10.0.0.2",
                            "packet_count": 4,
                            "frequency": 1
                        },
                        "alertflow_conditions": {
                            "cpu_usage": 50,
                            "ram_usage": 50,
                            "interface_stats": 1000,
                            "packet_loss": 5,
                            "jitter": 10
                        }
                    }
                },
                {
                    "device_id": "AG002",
                    "device_metrics": {
                        "cpu_usage": false,
                        "ram_usage": false,
                        "interface_stats": []
                    },
                    "link_metrics": {
                        "bandwidth": {
                            "tool": "iperf",
                            "is_server": true,
                            "server_address": "",
                            "duration": 10,
                            "transport": "tcp",
                            "frequency": 20
                        }
                    }
                }
            ]
        }
    ]"#;

    fn write_temp(content: &str) -> std::path::PathBuf {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let mut path = std::env::temp_dir();
        path.push(format!(
            "vigil-tasks-{}-{}.json",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_tasks_from_json() {
        let path = write_temp(TASKS_JSON);
        let tasks = load_tasks(&path);
        fs::remove_file(&path).ok();

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.id.as_str(), "T0001");
        assert_eq!(task.frequency, 10);
        assert_eq!(task.devices.len(), 2);

        let first = &task.devices[0];
        assert!(first.device_metrics.cpu_usage);
        let bandwidth = first.link_metrics.bandwidth.as_ref().unwrap();
        assert_eq!(bandwidth.transport, Transport::Tcp);
        assert!(!bandwidth.is_server);
        assert!(first.link_metrics.jitter.is_none());
        assert!(first.link_metrics.alertflow_conditions.is_some());

        let second = &task.devices[1];
        assert!(second.link_metrics.wants_iperf_server());
    }

    #[test]
    fn missing_file_yields_empty_list() {
        assert!(load_tasks(Path::new("/nonexistent/tasks.json")).is_empty());
    }

    #[test]
    fn unparsable_file_yields_empty_list() {
        let path = write_temp("{not json");
        let tasks = load_tasks(&path);
        fs::remove_file(&path).ok();
        assert!(tasks.is_empty());
    }

    #[test]
    fn required_agents_is_the_union_of_device_ids() {
        let path = write_temp(TASKS_JSON);
        let tasks = load_tasks(&path);
        fs::remove_file(&path).ok();

        let required = required_agents(&tasks);
        assert_eq!(required.len(), 2);
        assert!(required.contains(&AgentId::new("AG001").unwrap()));
        assert!(required.contains(&AgentId::new("AG002").unwrap()));
    }

    #[test]
    fn grouping_hands_each_agent_its_tasks() {
        let path = write_temp(TASKS_JSON);
        let tasks = load_tasks(&path);
        fs::remove_file(&path).ok();

        let grouped = tasks_by_device(&tasks);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&AgentId::new("AG001").unwrap()].len(), 1);
        assert_eq!(grouped[&AgentId::new("AG002").unwrap()].len(), 1);
    }
}
