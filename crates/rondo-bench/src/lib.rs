#[derive(Debug, Clone)]
pub struct BenchmarkCase {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub radius: u32,
}

pub fn default_cases() -> Vec<BenchmarkCase> {
    vec![
        BenchmarkCase {
            name: "small".to_string(),
            width: 512,
            height: 512,
            radius: 16,
        },
        BenchmarkCase {
            name: "medium".to_string(),
            width: 1024,
            height: 1024,
            radius: 64,
        },
        BenchmarkCase {
            name: "large".to_string(),
            width: 2048,
            height: 1024,
            radius: 200,
        },
    ]
}

pub fn describe(cases: &[BenchmarkCase]) -> String {
    cases
        .iter()
        .map(|c| format!("{}:{}x{}@r{}", c.name, c.width, c.height, c.radius))
        .collect::<Vec<_>>()
        .join(", ")
}
