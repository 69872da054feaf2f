//! Shared fixtures for the middleware benchmarks.

/// A named benchmark input.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    input: &'static str,
}

impl TestCase {
    pub const fn new(name: &'static str, group: TestGroup, input: &'static str) -> Self {
        Self { name, group, input }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn input(&self) -> &'static str {
        self.input
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Large,
}

pub const COOKIES: [TestCase; 3] = [
    TestCase::new("name_value", TestGroup::Small, "session=38afes7a8"),
    TestCase::new(
        "all_attributes",
        TestGroup::Large,
        "id=a3fWa; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=2592000; Domain=example.com; Path=/docs; Secure; HttpOnly; SameSite=Lax",
    ),
    TestCase::new("unknown_attributes", TestGroup::Large, "lang=en-US; Path=/; Priority=High; Partitioned; X-Custom=1; HttpOnly"),
];

/// Text chunks making up a response body, `count` chunks of roughly `size` bytes each.
pub fn text_chunks(count: usize, size: usize) -> Vec<String> {
    let line = "the quick brown fox jumps over the lazy dog é ";
    (0..count).map(|i| format!("{i:04} {}", line.repeat(size / line.len() + 1))).collect()
}
