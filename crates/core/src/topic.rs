//! Keyword gate restricting the assistant to programming topics.
//!
//! Prompts are split into lower-cased word tokens and checked against two
//! keyword sets, one token at a time and as adjacent pairs ("binary search").
//! A single strong keyword puts a prompt on topic. Everyday words that are
//! also programming terms ("map", "class", "problem") only count when at
//! least two distinct ones appear together. Matching whole tokens keeps short
//! keywords such as `r` or `c` from matching any prompt that merely contains
//! those letters.

use std::collections::HashSet;

const KEYWORDS: &[&str] = &[
    // languages
    "python", "java", "javascript", "typescript", "js", "ts", "c", "c++", "cpp", "c#",
    "csharp", "golang", "kotlin", "php", "r", "scala", "haskell", "sql", "html", "css",
    // data structures
    "linked list", "substring", "subarray", "subsequence", "binary tree", "bst",
    "deque", "hashmap", "hashset", "trie", "segment tree", "fenwick", "union find",
    "dsu", "data structure", "hash map", "hash table", "priority queue", "min heap",
    "max heap", "adjacency list", "null pointer",
    // techniques
    "algorithm", "recursion", "recursive", "binary search", "two pointers",
    "sliding window", "prefix sum", "bfs", "dfs", "dijkstra", "backtracking",
    "memoization", "dp", "dynamic programming", "bitmask", "big o",
    "time complexity", "space complexity", "for loop", "while loop", "infinite loop",
    // practice and tooling
    "leetcode", "codeforces", "codechef", "atcoder", "hackerrank", "testcase",
    "test case", "edge case", "unit test", "coding", "programming", "source code",
    "compile", "compiler", "syntax", "debug", "api", "git", "oop", "inheritance",
    "concurrency", "call stack", "stack overflow", "coding interview",
];

/// Words with an everyday meaning. One alone does not make a prompt on topic.
const AMBIGUOUS_KEYWORDS: &[&str] = &[
    "go", "rust", "swift", "ruby", "bash",
    "array", "list", "string", "matrix", "tree", "graph", "heap", "stack", "queue",
    "hash", "map", "set", "pointer", "node",
    "iteration", "loop", "sort", "sorting", "greedy", "modulo", "complexity",
    "optimize", "optimization",
    "contest", "competitive", "interview", "problem", "solution", "code", "program",
    "function", "method", "class", "object", "variable", "runtime", "bug",
    "exception", "database", "thread",
];

/// Distinct ambiguous keywords needed when no strong keyword is present.
const AMBIGUOUS_QUORUM: usize = 2;

/// Static keyword sets deciding whether a prompt is on topic.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    keywords: HashSet<String>,
    ambiguous: HashSet<String>,
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self {
            keywords: normalize(KEYWORDS.iter().copied()),
            ambiguous: normalize(AMBIGUOUS_KEYWORDS.iter().copied()),
        }
    }
}

impl TopicFilter {
    /// Builds a filter from custom keywords, each sufficient on its own.
    /// Keywords are matched case-insensitively.
    pub fn with_keywords<'a>(keywords: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            keywords: normalize(keywords),
            ambiguous: HashSet::new(),
        }
    }

    pub fn is_on_topic(&self, text: &str) -> bool {
        self.matched_keyword(text).is_some()
    }

    /// Returns the keyword that put `text` on topic, if any.
    ///
    /// That is the first strong keyword, or else the first ambiguous one when
    /// enough distinct ambiguous keywords appear.
    pub fn matched_keyword(&self, text: &str) -> Option<&str> {
        let tokens = tokenize(text);
        let bigrams: Vec<String> = tokens
            .windows(2)
            .map(|pair| format!("{} {}", pair[0], pair[1]))
            .collect();
        let candidates = || bigrams.iter().chain(tokens.iter()).map(String::as_str);

        if let Some(hit) = candidates().find_map(|c| lookup(&self.keywords, c)) {
            return Some(hit);
        }

        let mut seen: Vec<&str> = Vec::new();
        for hit in candidates().filter_map(|c| lookup(&self.ambiguous, c)) {
            if !seen.contains(&hit) {
                seen.push(hit);
            }
        }
        (seen.len() >= AMBIGUOUS_QUORUM).then(|| seen[0])
    }
}

fn normalize<'a>(keywords: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    keywords
        .into_iter()
        .map(|k| tokenize(k).join(" "))
        .filter(|k| !k.is_empty())
        .collect()
}

fn lookup<'s>(set: &'s HashSet<String>, candidate: &str) -> Option<&'s str> {
    if let Some(hit) = set.get(candidate) {
        return Some(hit.as_str());
    }
    // Plural forms: "arrays" -> "array", "binary searches" -> "binary search".
    candidate
        .strip_suffix("es")
        .filter(|s| s.len() > 2)
        .and_then(|s| set.get(s))
        .or_else(|| {
            candidate
                .strip_suffix('s')
                .filter(|s| s.len() > 2)
                .and_then(|s| set.get(s))
        })
        .map(String::as_str)
}

/// Lower-cases and splits on anything that is not alphanumeric, `+` or `#`.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
